use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::domain::message::{
    kind, ChatPostRequest, ConnectRequest, ConnectedBody, PongBody, ReadBody, ReadRequest, RoomEventBody,
    RoomRequest, SyncPageBody, SyncRequest, TypingRequest,
};
use crate::error::{AppError, AppResult};
use crate::realtime::pagination::SortOrder;
use crate::realtime::registry::Connection;
use crate::realtime::validation::{ValidatedPayload, ValidationError};
use crate::server::RealtimeServer;

/// 单个 socket 的会话状态 / Per-socket session state
///
/// 握手完成前只接受 `connect` 与 `ping`。
/// Until the handshake completes only `connect` and `ping` are accepted.
pub struct Session {
    server: RealtimeServer,
    connection_id: String,
    user_id: Option<String>,
    authenticated: Arc<AtomicBool>,
    outbound: UnboundedSender<Message>,
}

impl Session {
    pub fn new(server: RealtimeServer, connection_id: &str, outbound: UnboundedSender<Message>) -> Self {
        Self {
            server,
            connection_id: connection_id.to_string(),
            user_id: None,
            authenticated: Arc::new(AtomicBool::new(false)),
            outbound,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// 认证标记，供超时看门狗读取 / Flag read by the auth deadline watchdog
    pub fn auth_flag(&self) -> Arc<AtomicBool> {
        self.authenticated.clone()
    }

    pub(crate) fn outbound(&self) -> &UnboundedSender<Message> {
        &self.outbound
    }

    /// 处理一帧；返回 false 表示停止读取 / Handle one frame; `false` stops the read loop
    pub async fn handle_message(&mut self, message: Message) -> bool {
        match message {
            Message::Text(text) => {
                self.handle_text(&text).await;
                true
            }
            Message::Binary(_) => {
                self.reply_error(&ValidationError::single("frame", "expected text frame").into());
                true
            }
            Message::Close(_) => false,
            // tungstenite 自动回复 ping / tungstenite answers pings itself
            _ => true,
        }
    }

    /// 处理文本帧，错误回给来源连接 / Handle a text frame, errors go back to this socket
    pub async fn handle_text(&mut self, text: &str) {
        if let Err(e) = self.dispatch(text).await {
            match &e {
                AppError::Validation(_) => debug!(connection_id = %self.connection_id, "frame rejected: {}", e),
                _ => warn!(connection_id = %self.connection_id, "request failed: {}", e),
            }
            self.reply_error(&e);
        }
    }

    async fn dispatch(&mut self, text: &str) -> AppResult<()> {
        let payload = self.server.gate.validate_frame(text)?;
        let kind = payload.kind().to_string();
        let user_id = match (kind.as_str(), self.user_id.clone()) {
            ("ping", _) => return self.on_ping(),
            ("connect", None) => return self.on_connect(payload).await,
            ("connect", Some(_)) => {
                return Err(ValidationError::single("kind", "session is already authenticated").into())
            }
            (_, None) => return Err(AppError::unauthenticated("send connect first")),
            (_, Some(user_id)) => user_id,
        };

        match kind.as_str() {
            "chat.join" => {
                let req: RoomRequest = payload.into_typed()?;
                let changed = self.server.chat.join(&req.room_id, &user_id).await?;
                self.reply(kind::CHAT_JOINED, RoomEventBody { room_id: &req.room_id, changed });
            }
            "chat.leave" => {
                let req: RoomRequest = payload.into_typed()?;
                let changed = self.server.chat.leave(&req.room_id, &user_id).await?;
                self.reply(kind::CHAT_LEFT, RoomEventBody { room_id: &req.room_id, changed });
            }
            "chat.post" => {
                // 发送者也会收到广播 / the sender receives the fanout too
                let req: ChatPostRequest = payload.into_typed()?;
                self.server.chat.post_message(&req.room_id, &user_id, &req.content).await?;
            }
            "chat.typing" => {
                let req: TypingRequest = payload.into_typed()?;
                self.server.chat.relay_typing(&req.room_id, &user_id, req.is_typing)?;
            }
            "sync" => self.on_sync(payload, &user_id).await?,
            "notification.read" => {
                let req: ReadRequest = payload.into_typed()?;
                let updated = self.server.dispatcher.mark_read(&user_id, req.seq).await?;
                self.reply(kind::NOTIFICATION_READ, ReadBody { updated });
            }
            _ => return Err(ValidationError::unknown_kind().into()),
        }
        Ok(())
    }

    fn on_ping(&self) -> AppResult<()> {
        self.reply(kind::PONG, PongBody { timestamp: chrono::Utc::now().timestamp_millis() });
        Ok(())
    }

    async fn on_connect(&mut self, payload: ValidatedPayload) -> AppResult<()> {
        let req: ConnectRequest = payload.into_typed()?;
        let user_id = self.server.identity.verify(&req.uid, &req.token).await?;

        self.reply(kind::CONNECTED, ConnectedBody { connection_id: &self.connection_id, user_id: &user_id });
        let connection = Connection::new(&self.connection_id, &user_id, self.outbound.clone());
        self.server.attach(connection).await?;

        self.authenticated.store(true, Ordering::Release);
        info!(connection_id = %self.connection_id, user_id = %user_id, "🔐 connection authenticated");
        self.user_id = Some(user_id);
        Ok(())
    }

    async fn on_sync(&self, payload: ValidatedPayload, user_id: &str) -> AppResult<()> {
        let req: SyncRequest = payload.into_typed()?;
        let order = SortOrder::from_param(req.order.as_deref())?;

        match req.collection.as_str() {
            "notifications" => {
                self.server.dispatcher.flush_pending(user_id).await?;
                let request = self.server.pagination.request(req.cursor.as_deref(), req.limit, order)?;
                let page = self.server.notifications_page(user_id, &request).await?;
                self.reply(
                    kind::SYNC_PAGE,
                    SyncPageBody {
                        collection: "notifications",
                        items: page.items,
                        next_cursor: page.next_cursor.map(|c| c.to_string()),
                    },
                );
            }
            _ => {
                let room_id = req.room_id.as_deref().ok_or_else(|| ValidationError::single("roomId", "is required"))?;
                let request = self.server.pagination.request(req.cursor.as_deref(), req.limit, order)?;
                let page = self.server.chat.history(room_id, Some(user_id), &request).await?;
                self.reply(
                    kind::SYNC_PAGE,
                    SyncPageBody {
                        collection: "chat",
                        items: page.items,
                        next_cursor: page.next_cursor.map(|c| c.to_string()),
                    },
                );
            }
        }
        Ok(())
    }

    /// 断开时调用，重复调用无副作用 / Detach on disconnect; safe to call twice
    pub fn close(&mut self) {
        self.server.detach(&self.connection_id);
        self.user_id = None;
    }
}
