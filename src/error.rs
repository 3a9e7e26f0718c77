use actix_web::{HttpResponse, ResponseError};
use serde_json::{json, Value};
use thiserror::Error;

use crate::realtime::validation::ValidationError;

/// 统一的应用错误类型 / Unified application error
#[derive(Error, Debug)]
pub enum AppError {
    #[error("验证错误 / validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("非房间成员 / user {user_id} is not a member of room {room_id}")]
    NotAMember { room_id: String, user_id: String },

    #[error("无效载荷 / invalid payload: {reason}")]
    InvalidPayload { reason: String },

    #[error("连接重复注册 / connection {connection_id} already registered to {owner}")]
    DuplicateConnection { connection_id: String, owner: String },

    #[error("存储不可用 / store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[error("未认证 / unauthenticated: {message}")]
    Unauthenticated { message: String },

    #[error("资源未找到 / not found: {resource}")]
    NotFound { resource: String },

    #[error("配置错误 / configuration error: {0}")]
    Config(#[from] crate::comm::config::ConfigError),

    #[error("内部错误 / internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// 创建非成员错误
    pub fn not_a_member<R: Into<String>, U: Into<String>>(room_id: R, user_id: U) -> Self {
        Self::NotAMember { room_id: room_id.into(), user_id: user_id.into() }
    }

    /// 创建无效载荷错误
    pub fn invalid_payload<T: Into<String>>(reason: T) -> Self {
        Self::InvalidPayload { reason: reason.into() }
    }

    /// 创建存储不可用错误
    pub fn store_unavailable<T: Into<String>>(message: T) -> Self {
        Self::StoreUnavailable { message: message.into() }
    }

    /// 创建未认证错误
    pub fn unauthenticated<T: Into<String>>(message: T) -> Self {
        Self::Unauthenticated { message: message.into() }
    }

    /// 创建资源未找到错误
    pub fn not_found<T: Into<String>>(resource: T) -> Self {
        Self::NotFound { resource: resource.into() }
    }

    /// 获取错误代码
    pub fn error_code(&self) -> i32 {
        match self {
            AppError::Internal(_) => 1000,
            AppError::Config(_) => 1001,
            AppError::Unauthenticated { .. } => 1002,
            AppError::NotAMember { .. } => 1003,
            AppError::Validation(_) => 1004,
            AppError::InvalidPayload { .. } => 1005,
            AppError::StoreUnavailable { .. } => 1006,
            AppError::DuplicateConnection { .. } => 1007,
            AppError::NotFound { .. } => 1009,
        }
    }

    /// 获取HTTP状态码
    pub fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;

        match self {
            AppError::Validation(_) | AppError::InvalidPayload { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            AppError::NotAMember { .. } => StatusCode::FORBIDDEN,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::DuplicateConnection { .. } => StatusCode::CONFLICT,
            AppError::StoreUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Config(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 错误帧标签 / Tag used in outbound error frames
    pub fn tag(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_failed",
            AppError::NotAMember { .. } => "not_a_member",
            AppError::InvalidPayload { .. } => "invalid_payload",
            AppError::DuplicateConnection { .. } => "duplicate_connection",
            AppError::StoreUnavailable { .. } => "store_unavailable",
            AppError::Unauthenticated { .. } => "unauthenticated",
            AppError::NotFound { .. } => "not_found",
            AppError::Config(_) => "config_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// 客户端是否可以重试 / Whether the client may retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::StoreUnavailable { .. })
    }

    /// 面向客户端的错误描述 / Client-facing detail text
    pub fn details(&self) -> String {
        match self {
            AppError::Validation(err) => err.details(),
            AppError::NotAMember { room_id, .. } => format!("not a member of room {}", room_id),
            AppError::InvalidPayload { reason } => reason.clone(),
            AppError::DuplicateConnection { connection_id, .. } => {
                format!("connection {} already registered", connection_id)
            }
            AppError::StoreUnavailable { message } => message.clone(),
            AppError::Unauthenticated { message } => message.clone(),
            AppError::NotFound { resource } => format!("{} not found", resource),
            // 内部错误不泄露细节 / internal details stay in the logs
            AppError::Config(_) | AppError::Internal(_) => "internal error".to_string(),
        }
    }

    /// WebSocket 错误帧 / WebSocket error frame `{"error": tag, "details": text}`
    pub fn to_frame(&self) -> Value {
        json!({
            "error": self.tag(),
            "details": self.details(),
        })
    }

    fn log(&self) {
        match self {
            AppError::Internal(_) | AppError::Config(_) => tracing::error!("❌ {}", self),
            AppError::StoreUnavailable { .. } => tracing::warn!("⚠️ {}", self),
            _ => tracing::info!("Client error: {}", self),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        AppError::status_code(self)
    }

    fn error_response(&self) -> HttpResponse {
        self.log();

        HttpResponse::build(AppError::status_code(self)).json(json!({
            "success": false,
            "error": {
                "code": self.error_code(),
                "message": self.details(),
                "type": self.tag(),
                "retryable": self.is_retryable(),
            },
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }))
    }
}

/// 统一的成功响应 / Successful API response wrapper
#[derive(serde::Serialize)]
pub struct ApiResponse<T: serde::Serialize> {
    pub success: bool,
    pub data: T,
    pub timestamp: String,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self { success: true, data, timestamp: chrono::Utc::now().to_rfc3339() }
    }
}
