use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;

/// 出站帧类型 / Outbound frame kinds
pub mod kind {
    pub const NOTIFICATION: &str = "notification";
    pub const CHAT_MESSAGE: &str = "chat.message";
    pub const CHAT_TYPING: &str = "chat.typing";
    pub const CHAT_ROOMS: &str = "chat.rooms";
    pub const CHAT_JOINED: &str = "chat.joined";
    pub const CHAT_LEFT: &str = "chat.left";
    pub const PRESENCE_CHANGED: &str = "presence.changed";
    pub const CONNECTED: &str = "connected";
    pub const PONG: &str = "pong";
    pub const SYNC_PAGE: &str = "sync.page";
    pub const NOTIFICATION_READ: &str = "notification.read";
}

/// 实时帧 `{kind, body}` / Real-time frame `{kind, body}`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Frame {
    pub kind: String,
    #[serde(default)]
    pub body: Value,
}

impl Frame {
    pub fn new<T: Serialize>(kind: &str, body: T) -> Self {
        let body = serde_json::to_value(body).unwrap_or(Value::Null);
        Self { kind: kind.to_string(), body }
    }

    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// 编码出站帧 / Encode an outbound frame as text
pub fn encode<T: Serialize>(kind: &str, body: T) -> String {
    Frame::new(kind, body).to_text()
}

/// 编码错误帧 / Encode an error frame `{error, details}`
pub fn encode_error(err: &AppError) -> String {
    err.to_frame().to_string()
}

// 入站 body / inbound bodies

#[derive(Deserialize, Debug)]
pub struct ConnectRequest {
    pub uid: String,
    pub token: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RoomRequest {
    pub room_id: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ChatPostRequest {
    pub room_id: String,
    pub content: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TypingRequest {
    pub room_id: String,
    pub is_typing: bool,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub collection: String,
    pub room_id: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<usize>,
    pub order: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct ReadRequest {
    pub seq: Option<u64>,
}

// 出站 body / outbound bodies

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedBody<'a> {
    pub connection_id: &'a str,
    pub user_id: &'a str,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TypingBody<'a> {
    pub room_id: &'a str,
    pub user_id: &'a str,
    pub is_typing: bool,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RoomEventBody<'a> {
    pub room_id: &'a str,
    pub changed: bool,
}

#[derive(Serialize, Debug)]
pub struct RoomsBody {
    pub rooms: Vec<String>,
}

#[derive(Serialize, Debug)]
pub struct PongBody {
    pub timestamp: i64,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SyncPageBody<'a, T: Serialize> {
    pub collection: &'a str,
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct ReadBody {
    pub updated: usize,
}
