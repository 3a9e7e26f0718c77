use actix_web::{web, HttpResponse};
use serde::Serialize;
use utoipa::ToSchema;

use crate::server::RealtimeServer;

/// 健康检查响应 / Health check response
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub connections: usize,
    pub online_users: usize,
    pub timestamp: String,
}

pub fn register(cfg: &mut web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::get().to(health_handle)));
}

// 基础健康检查
// Basic health check
#[utoipa::path(
    get,
    path = "/v1/health",
    tag = "Health",
    responses((status = 200, description = "服务正常 / service is up", body = HealthResponse))
)]
pub async fn health_handle(server: web::Data<RealtimeServer>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        connections: server.registry.connection_count(),
        online_users: server.registry.online_users().len(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
