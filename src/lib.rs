//! v-realtime：实时通知与聊天投递 / Real-time notification and chat delivery
//!
//! `realtime` holds the five core components, `ws` the socket transport, `api` the
//! HTTP surface and `comm` configuration and logging.

pub mod api;
#[path = "bootstrap/app_bootstrap.rs"]
pub mod app_bootstrap;
#[path = "bootstrap/command_registry.rs"]
pub mod command_registry;
pub mod comm;
pub mod domain;
pub mod error;
pub mod realtime;
#[path = "bootstrap/route_registry.rs"]
pub mod route_registry;
pub mod server;
pub mod ws;

pub use app_bootstrap::AppBootstrap;
pub use error::{AppError, AppResult};
pub use server::RealtimeServer;
