//! WebSocket 接入层 / WebSocket transport

pub mod connection;
pub mod handler;
pub mod sender;
pub mod server;

pub use handler::Session;
