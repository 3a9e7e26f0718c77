//! 聊天房间接口 / Chat room endpoints

use actix_web::{http::header, web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};

use crate::error::{ApiResponse, AppError, AppResult};
use crate::realtime::chat::ChatMessage;
use crate::realtime::pagination::{build_link_header, SortOrder};
use crate::realtime::validation::ValidationError;
use crate::server::RealtimeServer;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemberRequest {
    pub user_id: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageRequest {
    pub sender_id: String,
    pub content: String,
}

/// 历史查询；`reader` 存在时校验成员身份 / History query; membership is checked when `reader` is set
#[derive(Debug, Deserialize, IntoParams)]
pub struct HistoryQuery {
    pub reader: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<usize>,
    /// asc | desc（默认 desc）
    pub order: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MembershipDto {
    pub room_id: String,
    pub user_id: String,
    pub changed: bool,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatPageDto {
    pub items: Vec<ChatMessage>,
    pub next_cursor: Option<String>,
}

pub fn register(cfg: &mut web::ServiceConfig, path: &str) {
    cfg.service(web::resource(format!("{}/{{room_id}}/members", path)).route(web::post().to(join_handle)))
        .service(
            web::resource(format!("{}/{{room_id}}/members/{{uid}}", path)).route(web::delete().to(leave_handle)),
        )
        .service(
            web::resource(format!("{}/{{room_id}}/messages", path))
                .route(web::post().to(post_handle))
                .route(web::get().to(history_handle)),
        );
}

/// 加入房间 / Join a room
#[utoipa::path(
    post,
    path = "/v1/rooms/{room_id}/members",
    tag = "Rooms",
    params(("room_id" = String, Path, description = "房间ID / room id")),
    request_body = MemberRequest,
    responses((status = 200, description = "成员变更 / membership result", body = MembershipDto))
)]
pub async fn join_handle(
    server: web::Data<RealtimeServer>,
    path: web::Path<String>,
    req: web::Json<MemberRequest>,
) -> AppResult<HttpResponse> {
    let room_id = path.into_inner();
    server.gate.validate("chat.join", &json!({ "roomId": room_id }))?;
    if req.user_id.trim().is_empty() {
        return Err(ValidationError::single("userId", "must not be empty").into());
    }
    let changed = server.chat.join(&room_id, &req.user_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(MembershipDto {
        room_id,
        user_id: req.into_inner().user_id,
        changed,
    })))
}

/// 离开房间 / Leave a room
#[utoipa::path(
    delete,
    path = "/v1/rooms/{room_id}/members/{uid}",
    tag = "Rooms",
    params(
        ("room_id" = String, Path, description = "房间ID / room id"),
        ("uid" = String, Path, description = "用户ID / user id")
    ),
    responses((status = 200, description = "成员变更 / membership result", body = MembershipDto))
)]
pub async fn leave_handle(
    server: web::Data<RealtimeServer>,
    path: web::Path<(String, String)>,
) -> AppResult<HttpResponse> {
    let (room_id, user_id) = path.into_inner();
    let changed = server.chat.leave(&room_id, &user_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(MembershipDto { room_id, user_id, changed })))
}

/// 发送消息 / Post a chat message
#[utoipa::path(
    post,
    path = "/v1/rooms/{room_id}/messages",
    tag = "Rooms",
    params(("room_id" = String, Path, description = "房间ID / room id")),
    request_body = PostMessageRequest,
    responses(
        (status = 200, description = "已排序并广播 / sequenced and fanned out", body = ChatMessage),
        (status = 403, description = "非成员 / not a member")
    )
)]
pub async fn post_handle(
    server: web::Data<RealtimeServer>,
    path: web::Path<String>,
    req: web::Json<PostMessageRequest>,
) -> AppResult<HttpResponse> {
    let room_id = path.into_inner();
    server
        .gate
        .validate("chat.post", &json!({ "roomId": room_id, "content": req.content }))?;
    let message = server.chat.post_message(&room_id, &req.sender_id, &req.content).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(message)))
}

/// 聊天历史 / Chat history
#[utoipa::path(
    get,
    path = "/v1/rooms/{room_id}/messages",
    tag = "Rooms",
    params(("room_id" = String, Path, description = "房间ID / room id"), HistoryQuery),
    responses(
        (status = 200, description = "一页消息 / one page", body = ChatPageDto),
        (status = 403, description = "读者不是成员 / reader is not a member"),
        (status = 404, description = "房间不存在 / unknown room")
    )
)]
pub async fn history_handle(
    server: web::Data<RealtimeServer>,
    path: web::Path<String>,
    query: web::Query<HistoryQuery>,
) -> AppResult<HttpResponse> {
    let room_id = path.into_inner();
    if query.reader.is_none() && !server.chat.room_exists(&room_id) {
        return Err(AppError::not_found(format!("room {}", room_id)));
    }
    let order = SortOrder::from_param(query.order.as_deref())?;
    let request = server.pagination.request(query.cursor.as_deref(), query.limit, order)?;
    let page = server.chat.history(&room_id, query.reader.as_deref(), &request).await?;

    let mut response = HttpResponse::Ok();
    if let Some(link) = build_link_header(&format!("/v1/rooms/{}/messages", room_id), page.next_cursor, &request) {
        response.insert_header((header::LINK, link));
    }
    Ok(response.json(ApiResponse::success(ChatPageDto {
        items: page.items,
        next_cursor: page.next_cursor.map(|c| c.to_string()),
    })))
}
