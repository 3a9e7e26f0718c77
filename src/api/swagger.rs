use utoipa::OpenApi;

/// OpenAPI 文档聚合 / OpenAPI document
#[derive(OpenApi)]
#[openapi(
    info(title = "v-realtime", description = "实时通知与聊天投递 / Real-time notification and chat delivery"),
    paths(
        crate::api::notifications::dispatch_handle,
        crate::api::notifications::list_handle,
        crate::api::notifications::read_all_handle,
        crate::api::rooms::join_handle,
        crate::api::rooms::leave_handle,
        crate::api::rooms::post_handle,
        crate::api::rooms::history_handle,
        crate::api::reports::list_handle,
        crate::api::reports::create_handle,
        crate::api::presence::presence_handle,
        crate::api::health::health_handle,
    ),
    components(
        schemas(
            crate::api::notifications::DispatchRequest,
            crate::api::notifications::NotificationPageDto,
            crate::api::notifications::ReadAllDto,
            crate::api::rooms::MemberRequest,
            crate::api::rooms::PostMessageRequest,
            crate::api::rooms::MembershipDto,
            crate::api::rooms::ChatPageDto,
            crate::api::reports::ReplyRequest,
            crate::api::presence::PresenceDto,
            crate::api::health::HealthResponse,
            crate::realtime::notification::DispatchResult,
            crate::realtime::notification::NotificationRecord,
            crate::realtime::notification::EventKind,
            crate::realtime::notification::Visibility,
            crate::realtime::notification::DomainRefs,
            crate::realtime::notification::DeliveryState,
            crate::realtime::chat::ChatMessage,
            crate::realtime::report::ReportReply,
            crate::realtime::report::ReplyPage,
        )
    ),
    tags(
        (name = "Notifications", description = "通知分发与历史 / notification dispatch and history"),
        (name = "Rooms", description = "聊天房间 / chat rooms"),
        (name = "Reports", description = "报告回复 / report replies"),
        (name = "Presence", description = "在线状态 / presence"),
        (name = "Health", description = "健康检查 / health check")
    )
)]
pub struct ApiDoc;
