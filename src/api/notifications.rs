//! 通知接口 / Notification endpoints
//!
//! `dispatch` 供业务层（出价、采购申请、报告）在状态变更后调用。
//! `dispatch` is called by the domain layer after a bid, purchase request or report changes.

use actix_web::{http::header, web, HttpResponse};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::error::{ApiResponse, AppResult};
use crate::realtime::notification::{
    DispatchResult, DomainRefs, EventKind, NotificationPayload, NotificationRecord, Visibility,
};
use crate::realtime::pagination::{build_link_header, SortOrder};
use crate::server::RealtimeServer;

/// 分发请求 / Dispatch request
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    pub kind: EventKind,
    pub creator_id: String,
    pub message: String,
    pub visibility: Visibility,
    /// 定向通知必填 / required for targeted notifications
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub refs: DomainRefs,
}

impl DispatchRequest {
    fn into_payload(self) -> NotificationPayload {
        let payload = match self.visibility {
            Visibility::Public => NotificationPayload::public(self.kind, &self.creator_id, &self.message),
            Visibility::Targeted => {
                NotificationPayload::targeted(self.kind, &self.creator_id, &self.message, self.recipients)
            }
        };
        payload.with_refs(self.refs)
    }
}

/// 分页查询参数 / Cursor query parameters
#[derive(Debug, Deserialize, IntoParams)]
pub struct CursorQuery {
    pub cursor: Option<String>,
    pub limit: Option<usize>,
    /// asc | desc（默认 desc）
    pub order: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPageDto {
    pub items: Vec<NotificationRecord>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReadAllDto {
    pub updated: usize,
}

pub fn register(cfg: &mut web::ServiceConfig, path: &str) {
    cfg.service(web::resource(format!("{}/dispatch", path)).route(web::post().to(dispatch_handle)))
        .service(web::resource(format!("{}/{{uid}}", path)).route(web::get().to(list_handle)))
        .service(web::resource(format!("{}/{{uid}}/read-all", path)).route(web::post().to(read_all_handle)));
}

/// 分发通知 / Dispatch a notification
#[utoipa::path(
    post,
    path = "/v1/notifications/dispatch",
    tag = "Notifications",
    request_body = DispatchRequest,
    responses(
        (status = 200, description = "已持久化并推送 / persisted and pushed", body = DispatchResult),
        (status = 400, description = "无效载荷 / invalid payload"),
        (status = 503, description = "存储不可用，可重试 / store unavailable, retryable")
    )
)]
pub async fn dispatch_handle(
    server: web::Data<RealtimeServer>,
    req: web::Json<DispatchRequest>,
) -> AppResult<HttpResponse> {
    let result = server.dispatcher.dispatch(&req.into_inner().into_payload()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(result)))
}

/// 通知历史 / Notification history
#[utoipa::path(
    get,
    path = "/v1/notifications/{uid}",
    tag = "Notifications",
    params(("uid" = String, Path, description = "用户ID / user id"), CursorQuery),
    responses(
        (status = 200, description = "一页通知 / one page", body = NotificationPageDto),
        (status = 400, description = "游标无效 / malformed cursor")
    )
)]
pub async fn list_handle(
    server: web::Data<RealtimeServer>,
    path: web::Path<String>,
    query: web::Query<CursorQuery>,
) -> AppResult<HttpResponse> {
    let uid = path.into_inner();
    let order = SortOrder::from_param(query.order.as_deref())?;
    let request = server.pagination.request(query.cursor.as_deref(), query.limit, order)?;
    let page = server.notifications_page(&uid, &request).await?;

    let mut response = HttpResponse::Ok();
    if let Some(link) = build_link_header(&format!("/v1/notifications/{}", uid), page.next_cursor, &request) {
        response.insert_header((header::LINK, link));
    }
    Ok(response.json(ApiResponse::success(NotificationPageDto {
        items: page.items,
        next_cursor: page.next_cursor.map(|c| c.to_string()),
    })))
}

/// 全部标记已读 / Mark every notification read
#[utoipa::path(
    post,
    path = "/v1/notifications/{uid}/read-all",
    tag = "Notifications",
    params(("uid" = String, Path, description = "用户ID / user id")),
    responses((status = 200, description = "已更新条数 / records updated", body = ReadAllDto))
)]
pub async fn read_all_handle(server: web::Data<RealtimeServer>, path: web::Path<String>) -> AppResult<HttpResponse> {
    let updated = server.dispatcher.mark_all_read(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(ReadAllDto { updated })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::config_validator::RealtimeSettings;
    use actix_web::{test, App};
    use serde_json::{json, Value};

    fn app_server() -> RealtimeServer {
        RealtimeServer::new(RealtimeSettings::default())
    }

    #[actix_web::test]
    async fn test_dispatch_then_list_with_link_header() {
        let server = app_server();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(server.clone()))
                .configure(|cfg| register(cfg, "/v1/notifications")),
        )
        .await;

        for i in 0..3 {
            let req = test::TestRequest::post()
                .uri("/v1/notifications/dispatch")
                .set_json(json!({
                    "kind": "NEW BID",
                    "creatorId": "supplier",
                    "message": format!("bid {}", i),
                    "visibility": "targeted",
                    "recipients": ["buyer"],
                    "refs": {"bidId": format!("b{}", i)}
                }))
                .to_request();
            let resp: Value = test::call_and_read_body_json(&app, req).await;
            assert_eq!(resp["data"]["pending"], json!(["buyer"]));
        }

        let req = test::TestRequest::get().uri("/v1/notifications/buyer?limit=2").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        let link = resp.headers().get(header::LINK).unwrap().to_str().unwrap().to_string();
        assert_eq!(link, "</v1/notifications/buyer?cursor=s:2&limit=2>; rel=\"next\"");
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["items"][0]["message"], "bid 2");
        assert_eq!(body["data"]["nextCursor"], "s:2");
    }

    #[actix_web::test]
    async fn test_dispatch_rejects_empty_targeted() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(app_server()))
                .configure(|cfg| register(cfg, "/v1/notifications")),
        )
        .await;
        let req = test::TestRequest::post()
            .uri("/v1/notifications/dispatch")
            .set_json(json!({
                "kind": "NEW BID",
                "creatorId": "supplier",
                "message": "bid",
                "visibility": "targeted",
                "recipients": []
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 400);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "invalid_payload");
    }

    #[actix_web::test]
    async fn test_store_outage_is_retryable() {
        let store = std::sync::Arc::new(crate::realtime::store::MemoryStore::new());
        let identity = std::sync::Arc::new(crate::realtime::identity::SharedSecretIdentity::new("secret-key"));
        let server = RealtimeServer::with_parts(RealtimeSettings::default(), store.clone(), identity);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(server))
                .configure(|cfg| register(cfg, "/v1/notifications")),
        )
        .await;
        store.set_unavailable(true);

        let req = test::TestRequest::post().uri("/v1/notifications/u1/read-all").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 503);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["retryable"], true);
    }
}
