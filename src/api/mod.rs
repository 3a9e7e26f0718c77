//! HTTP 接口 / HTTP API
//!
//! 每个模块提供 `register(cfg, path)`，由路由注册器挂载。
//! Each module exposes `register(cfg, path)`; the route registry mounts them.

pub mod health;
pub mod notifications;
pub mod presence;
pub mod reports;
pub mod rooms;
pub mod swagger;
