use serde::Serialize;
use std::borrow::Cow;
use tokio::sync::mpsc::UnboundedSender;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::domain::message::{encode, encode_error};
use crate::error::AppError;
use crate::ws::handler::Session;

/// 发送关闭帧 / Queue a close frame; the writer task closes the socket after it
pub fn send_close(outbound: &UnboundedSender<Message>, reason: &'static str) -> bool {
    let close = Message::Close(Some(CloseFrame { code: CloseCode::Policy, reason: Cow::Borrowed(reason) }));
    outbound.send(close).is_ok()
}

impl Session {
    /// 回复当前连接 / Reply to this connection only
    pub(crate) fn reply<T: Serialize>(&self, kind: &str, body: T) {
        self.reply_text(encode(kind, body));
    }

    /// 错误帧只发给来源连接 / Error frames go to the originating connection only
    pub(crate) fn reply_error(&self, err: &AppError) {
        self.reply_text(encode_error(err));
    }

    fn reply_text(&self, text: String) {
        if self.outbound().send(Message::Text(text)).is_err() {
            tracing::debug!(connection_id = %self.connection_id(), "reply dropped, writer is gone");
        }
    }
}
