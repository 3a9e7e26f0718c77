//! 报告回复接口 / Report reply endpoints

use actix_web::{http::header, web, HttpResponse};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use crate::error::{ApiResponse, AppResult};
use crate::realtime::pagination::{build_page_link_header, Cursor};
use crate::realtime::report::{ReplyPage, ReportReply};
use crate::server::RealtimeServer;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRequest {
    pub author_id: String,
    pub message: String,
    /// 报告所有者，接收回复通知 / report owner, notified of the reply
    pub report_owner_id: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ReplyQuery {
    pub page: Option<u32>,
    pub limit: Option<usize>,
    /// 首页返回的头部序号，固定后续页 / head seq from the first page; pins later pages
    pub head: Option<u64>,
}

pub fn register(cfg: &mut web::ServiceConfig, path: &str) {
    cfg.service(
        web::resource(format!("{}/{{report_id}}/replies", path))
            .route(web::get().to(list_handle))
            .route(web::post().to(create_handle)),
    );
}

/// 回复列表（最新在前）/ List replies, newest first
#[utoipa::path(
    get,
    path = "/v1/reports/{report_id}/replies",
    tag = "Reports",
    params(("report_id" = String, Path, description = "报告ID / report id"), ReplyQuery),
    responses(
        (status = 200, description = "一页回复 / one page", body = ReplyPage),
        (status = 400, description = "页码无效 / invalid page")
    )
)]
pub async fn list_handle(
    server: web::Data<RealtimeServer>,
    path: web::Path<String>,
    query: web::Query<ReplyQuery>,
) -> AppResult<HttpResponse> {
    let report_id = path.into_inner();
    let page = server
        .reports
        .replies(&report_id, query.page, query.head, query.limit)
        .await?;

    let mut response = HttpResponse::Ok();
    let next = page.next_cursor.as_deref().map(str::parse::<Cursor>).transpose()?;
    if let Some(link) = build_page_link_header(&format!("/v1/reports/{}/replies", report_id), next, page.limit) {
        response.insert_header((header::LINK, link));
    }
    Ok(response.json(ApiResponse::success(page)))
}

/// 添加回复 / Add a reply
#[utoipa::path(
    post,
    path = "/v1/reports/{report_id}/replies",
    tag = "Reports",
    params(("report_id" = String, Path, description = "报告ID / report id")),
    request_body = ReplyRequest,
    responses(
        (status = 200, description = "已保存 / stored", body = ReportReply),
        (status = 400, description = "校验失败 / validation failed")
    )
)]
pub async fn create_handle(
    server: web::Data<RealtimeServer>,
    path: web::Path<String>,
    req: web::Json<ReplyRequest>,
) -> AppResult<HttpResponse> {
    let reply = server
        .reports
        .add_reply(&path.into_inner(), &req.author_id, &req.message, req.report_owner_id.as_deref())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(reply)))
}
