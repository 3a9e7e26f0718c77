use actix_web::{web, HttpResponse};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::{ApiResponse, AppResult};
use crate::server::RealtimeServer;

/// 在线状态 / Presence of one user
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PresenceDto {
    pub user_id: String,
    pub online: bool,
    /// 活跃连接数（多设备）/ live connections across devices
    pub connections: usize,
}

pub fn register(cfg: &mut web::ServiceConfig, path: &str) {
    cfg.service(web::resource(format!("{}/{{uid}}", path)).route(web::get().to(presence_handle)));
}

/// 查询在线状态 / Query presence
#[utoipa::path(
    get,
    path = "/v1/presence/{uid}",
    tag = "Presence",
    params(("uid" = String, Path, description = "用户ID / user id")),
    responses((status = 200, description = "在线状态 / presence", body = PresenceDto))
)]
pub async fn presence_handle(server: web::Data<RealtimeServer>, path: web::Path<String>) -> AppResult<HttpResponse> {
    let user_id = path.into_inner();
    let connections = server.registry.connections_for(&user_id).len();
    Ok(HttpResponse::Ok().json(ApiResponse::success(PresenceDto {
        online: connections > 0,
        connections,
        user_id,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::config_validator::RealtimeSettings;
    use crate::realtime::registry::Connection;
    use actix_web::{test, App};
    use serde_json::Value;
    use tokio::sync::mpsc;

    #[actix_web::test]
    async fn test_presence_reflects_registry() {
        let server = RealtimeServer::new(RealtimeSettings::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        server.registry.register(Connection::new("c1", "u1", tx)).unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(server))
                .configure(|cfg| register(cfg, "/v1/presence")),
        )
        .await;

        let req = test::TestRequest::get().uri("/v1/presence/u1").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["online"], true);
        assert_eq!(body["data"]["connections"], 1);

        let req = test::TestRequest::get().uri("/v1/presence/u2").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["online"], false);
    }
}
