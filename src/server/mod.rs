use std::sync::Arc;
use tracing::{error, info, warn};

use crate::comm::config_validator::RealtimeSettings;
use crate::domain::message::{encode, kind, RoomsBody};
use crate::error::AppResult;
use crate::realtime::chat::ChatRoomRouter;
use crate::realtime::dispatcher::NotificationDispatcher;
use crate::realtime::identity::{IdentityProvider, SharedSecretIdentity};
use crate::realtime::notification::NotificationRecord;
use crate::realtime::pagination::{Page, PageRequest, PaginationService};
use crate::realtime::presence::{PresenceBroadcaster, PresenceStatus};
use crate::realtime::registry::{Connection, ConnectionRegistry, PresenceChange};
use crate::realtime::report::ReportService;
use crate::realtime::store::{MemoryStore, RealtimeStore};
use crate::realtime::validation::SchemaRegistry;

/// 服务端全局状态 / Server global state
///
/// 所有字段都是共享句柄，克隆成本低，每个连接任务持有一份。
/// Every field is a shared handle; each connection task holds its own clone.
#[derive(Clone)]
pub struct RealtimeServer {
    pub registry: Arc<ConnectionRegistry>,         // 连接注册表 / Connection registry
    pub gate: Arc<SchemaRegistry>,                 // 入站校验 / Inbound validation gate
    pub dispatcher: Arc<NotificationDispatcher>,   // 通知分发 / Notification dispatcher
    pub chat: Arc<ChatRoomRouter>,                 // 聊天路由 / Chat room router
    pub presence: Arc<PresenceBroadcaster>,        // 在线状态广播 / Presence broadcast
    pub reports: Arc<ReportService>,               // 报告回复 / Report replies
    pub pagination: PaginationService,             // 分页策略 / Page size policy
    pub identity: Arc<dyn IdentityProvider>,       // 身份校验 / Identity provider
    pub store: Arc<dyn RealtimeStore>,             // 持久化存储 / Durable store
    pub settings: Arc<RealtimeSettings>,           // 配置 / Settings
}

impl RealtimeServer {
    /// 使用内存存储与共享密钥身份构建 / Build with the memory store and shared-secret identity
    pub fn new(settings: RealtimeSettings) -> Self {
        let identity = Arc::new(SharedSecretIdentity::new(&settings.auth.shared_secret));
        Self::with_parts(settings, Arc::new(MemoryStore::new()), identity)
    }

    /// 指定存储与身份提供者 / Build with an explicit store and identity provider
    pub fn with_parts(
        settings: RealtimeSettings,
        store: Arc<dyn RealtimeStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let pagination = PaginationService::new(
            settings.pagination.default_page_size,
            settings.pagination.max_page_size,
        );
        let dispatcher = Arc::new(NotificationDispatcher::new(
            registry.clone(),
            store.clone(),
            settings.delivery.flush_batch,
        ));
        let chat = Arc::new(ChatRoomRouter::new(registry.clone(), store.clone()));
        let reports = Arc::new(ReportService::new(store.clone(), dispatcher.clone(), pagination));
        Self {
            gate: Arc::new(SchemaRegistry::builtin(pagination.max_page_size())),
            presence: Arc::new(PresenceBroadcaster::new(registry.clone())),
            registry,
            dispatcher,
            chat,
            reports,
            pagination,
            identity,
            store,
            settings: Arc::new(settings),
        }
    }

    /// 启动前恢复状态 / Restore persisted state before accepting traffic
    pub async fn restore(&self) -> AppResult<()> {
        let members = self.chat.load_rooms().await?;
        info!("♻️ restored {} room memberships", members);
        Ok(())
    }

    /// 认证成功后挂载连接 / Attach an authenticated connection
    ///
    /// 注册、广播上线、下发房间列表并补发离线通知。
    /// Registers, announces presence, sends the room list, then flushes pending
    /// notifications. Store failures after registration are logged, not returned.
    pub async fn attach(&self, connection: Connection) -> AppResult<PresenceChange> {
        let user_id = connection.user_id.clone();
        let change = self.registry.register(connection.clone())?;

        if let Err(e) = self.store.remember_user(&user_id).await {
            error!(user_id = %user_id, "❌ failed to remember user: {}", e);
        }
        if let Some(status) = PresenceStatus::from_change(change) {
            self.presence.announce(&user_id, status);
        }

        let rooms = encode(kind::CHAT_ROOMS, RoomsBody { rooms: self.chat.rooms_for(&user_id) });
        if let Err(e) = connection.send_text(rooms) {
            warn!(user_id = %user_id, "room list not sent: {}", e);
        }

        match self.dispatcher.flush_pending(&user_id).await {
            Ok(count) if count > 0 => info!(user_id = %user_id, count, "📬 delivered pending notifications"),
            Ok(_) => {}
            Err(e) => warn!(user_id = %user_id, "pending flush deferred: {}", e),
        }
        Ok(change)
    }

    /// 断开连接 / Detach a connection; duplicate calls are harmless
    pub fn detach(&self, connection_id: &str) -> Option<(String, PresenceChange)> {
        let (user_id, change) = self.registry.unregister(connection_id)?;
        if let Some(status) = PresenceStatus::from_change(change) {
            self.presence.announce(&user_id, status);
        }
        Some((user_id, change))
    }

    /// 通知历史（最新在前）/ Notification history, newest first by default
    ///
    /// 只读，不触发补发 / Read only; does not flush pending records
    pub async fn notifications_page(&self, user_id: &str, request: &PageRequest) -> AppResult<Page<NotificationRecord>> {
        self.store.page_notifications(user_id, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::notification::{EventKind, NotificationPayload};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_attach_sends_rooms_and_flushes_pending() {
        let server = RealtimeServer::new(RealtimeSettings::default());
        server.chat.join("R1", "u").await.unwrap();
        let payload = NotificationPayload::targeted(EventKind::NewBid, "c", "bid", ["u"]);
        server.dispatcher.dispatch(&payload).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let change = server.attach(Connection::new("c1", "u", tx)).await.unwrap();
        assert_eq!(change, PresenceChange::CameOnline);

        let first: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap().into_text().unwrap()).unwrap();
        assert_eq!(first["kind"], "chat.rooms");
        assert_eq!(first["body"]["rooms"], serde_json::json!(["R1"]));
        let second: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap().into_text().unwrap()).unwrap();
        assert_eq!(second["kind"], "notification");
        assert_eq!(second["body"]["seq"], 1);
    }

    #[tokio::test]
    async fn test_presence_transitions_are_broadcast() {
        let server = RealtimeServer::new(RealtimeSettings::default());
        let (tx_w, mut watcher) = mpsc::unbounded_channel();
        server.attach(Connection::new("w", "watcher", tx_w)).await.unwrap();
        while watcher.try_recv().is_ok() {}

        let (tx, _rx) = mpsc::unbounded_channel();
        server.attach(Connection::new("c1", "u", tx)).await.unwrap();
        let online: serde_json::Value = serde_json::from_str(&watcher.try_recv().unwrap().into_text().unwrap()).unwrap();
        assert_eq!(online["body"]["status"], "online");

        assert_eq!(server.detach("c1"), Some(("u".to_string(), PresenceChange::WentOffline)));
        let offline: serde_json::Value = serde_json::from_str(&watcher.try_recv().unwrap().into_text().unwrap()).unwrap();
        assert_eq!(offline["body"]["status"], "offline");
        assert_eq!(server.detach("c1"), None);
    }

    #[tokio::test]
    async fn test_notifications_page_does_not_flush() {
        let server = RealtimeServer::new(RealtimeSettings::default());
        let payload = NotificationPayload::targeted(EventKind::Feedback, "c", "thanks", ["u"]);
        server.dispatcher.dispatch(&payload).await.unwrap();

        let request = server.pagination.request(None, None, Default::default()).unwrap();
        let page = server.notifications_page("u", &request).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].state, crate::realtime::notification::DeliveryState::Pending);
    }
}
