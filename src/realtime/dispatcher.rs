//! 通知分发器 / Notification dispatcher
//!
//! 每个接收者一条"通道"锁，串行化该接收者的 追加 -> 推送 与重连补发，
//! 保证推送顺序与序号一致。不存在跨用户的全局锁。
//! One lane lock per recipient serializes append-then-push and reconnect flushes for
//! that recipient, so pushes reach every device in sequence order. There is no lock
//! spanning users.

use chrono::Utc;
use dashmap::DashMap;
use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::domain::message::{encode, kind};
use crate::error::{AppError, AppResult};
use crate::realtime::notification::{
    DispatchResult, NotificationPayload, NotificationPush, NotificationRecord, Visibility,
};
use crate::realtime::registry::{Connection, ConnectionRegistry};
use crate::realtime::store::RealtimeStore;

enum Outcome {
    Delivered,
    Pending,
}

/// 持有期间串行化该接收者；释放后无人等待则移除通道
/// Serializes one recipient while held. On release the lane is dropped when nobody else holds it.
struct LaneGuard<'a> {
    lanes: &'a DashMap<String, Arc<Mutex<()>>>,
    recipient_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for LaneGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // 等待者持有克隆，计数为 1 说明只剩映射表 / waiters hold clones, so 1 means only the map
        self.lanes.remove_if(&self.recipient_id, |_, lane| Arc::strong_count(lane) == 1);
    }
}

pub struct NotificationDispatcher {
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn RealtimeStore>,
    lanes: DashMap<String, Arc<Mutex<()>>>,
    flush_batch: usize,
}

impl NotificationDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>, store: Arc<dyn RealtimeStore>, flush_batch: usize) -> Self {
        Self {
            registry,
            store,
            lanes: DashMap::new(),
            flush_batch: flush_batch.max(1),
        }
    }

    /// 获取接收者通道锁 / Acquire the recipient's lane
    async fn lane(&self, recipient_id: &str) -> LaneGuard<'_> {
        let lane = match self.lanes.get(recipient_id) {
            Some(lane) => lane.clone(),
            None => self.lanes.entry(recipient_id.to_string()).or_default().clone(),
        };
        LaneGuard {
            lanes: &self.lanes,
            recipient_id: recipient_id.to_string(),
            guard: Some(lane.lock_owned().await),
        }
    }

    /// 分发通知 / Dispatch a domain event
    ///
    /// 离线接收者不会阻塞或导致失败；单个接收者的存储失败不影响其他接收者。
    /// 只有在一条记录都未创建且存在失败时返回 `StoreUnavailable`。
    /// Offline recipients never slow down or fail the call. A store failure for one
    /// recipient is reported in `failed`; the call only errors when nothing was persisted.
    pub async fn dispatch(&self, payload: &NotificationPayload) -> AppResult<DispatchResult> {
        Self::check_payload(payload)?;
        let recipients = self.resolve_recipients(payload).await?;

        let outcomes = join_all(recipients.iter().map(|r| self.deliver_new(payload, r))).await;

        let mut result = DispatchResult { notification_id: Some(payload.id), ..Default::default() };
        let mut last_error = None;
        for (recipient, outcome) in recipients.into_iter().zip(outcomes) {
            match outcome {
                Ok(Outcome::Delivered) => {
                    result.delivered.push(recipient.clone());
                    result.recipients.push(recipient);
                }
                Ok(Outcome::Pending) => {
                    result.pending.push(recipient.clone());
                    result.recipients.push(recipient);
                }
                Err(e) => {
                    error!(recipient_id = %recipient, notification_id = %payload.id, "❌ record not created: {}", e);
                    result.failed.push(recipient);
                    last_error = Some(e);
                }
            }
        }

        if result.recipients.is_empty() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        info!(
            notification_id = %payload.id,
            kind = ?payload.kind,
            recipients = result.recipients.len(),
            delivered = result.delivered.len(),
            pending = result.pending.len(),
            failed = result.failed.len(),
            "📨 notification dispatched"
        );
        Ok(result)
    }

    fn check_payload(payload: &NotificationPayload) -> AppResult<()> {
        if payload.creator_id.trim().is_empty() {
            return Err(AppError::invalid_payload("creator id must not be empty"));
        }
        if payload.visibility == Visibility::Targeted {
            if payload.recipients.is_empty() {
                return Err(AppError::invalid_payload("targeted notification requires at least one recipient"));
            }
            if payload.recipients.iter().any(|r| r.trim().is_empty()) {
                return Err(AppError::invalid_payload("recipient ids must not be empty"));
            }
        }
        Ok(())
    }

    /// 分发时计算接收者 / Recipient set, computed at dispatch time
    async fn resolve_recipients(&self, payload: &NotificationPayload) -> AppResult<Vec<String>> {
        match payload.visibility {
            Visibility::Targeted => {
                let mut seen = HashSet::new();
                Ok(payload
                    .recipients
                    .iter()
                    .filter(|r| seen.insert(r.as_str()))
                    .cloned()
                    .collect())
            }
            Visibility::Public => Ok(self
                .store
                .known_users()
                .await?
                .into_iter()
                .filter(|u| u != &payload.creator_id)
                .collect()),
        }
    }

    /// 为单个接收者创建记录并尝试推送 / Persist one record, then push if online
    async fn deliver_new(&self, payload: &NotificationPayload, recipient_id: &str) -> AppResult<Outcome> {
        let _lane = self.lane(recipient_id).await;

        let record = self
            .store
            .append_notification(NotificationRecord::pending(payload, recipient_id))
            .await?;

        let connections = self.registry.connections_for(recipient_id);
        if connections.is_empty() {
            debug!(recipient_id = %recipient_id, seq = record.seq, "recipient offline, record pending");
            return Ok(Outcome::Pending);
        }

        // 先补发更早的 pending，再推送新记录 / earlier pending records go out first
        let delivered = match self.flush_locked(recipient_id, &connections).await {
            Ok(delivered) => delivered.contains(&record.seq),
            Err(e) => {
                warn!(recipient_id = %recipient_id, seq = record.seq, "push deferred: {}", e);
                false
            }
        };
        Ok(if delivered { Outcome::Delivered } else { Outcome::Pending })
    }

    /// 补发待投递记录 / Flush a user's pending records in sequence order
    ///
    /// 在连接注册后与同步读取前调用。返回投递的记录数。
    /// Called after a connection registers and before a sync read. Returns the count.
    pub async fn flush_pending(&self, user_id: &str) -> AppResult<usize> {
        let _lane = self.lane(user_id).await;

        let connections = self.registry.connections_for(user_id);
        if connections.is_empty() {
            return Ok(0);
        }
        let delivered = self.flush_locked(user_id, &connections).await?;
        if !delivered.is_empty() {
            info!(user_id = %user_id, count = delivered.len(), "✅ pending notifications flushed");
        }
        Ok(delivered.len())
    }

    /// 调用方必须持有该用户的通道锁 / Caller holds the user's lane
    async fn flush_locked(&self, user_id: &str, connections: &[Connection]) -> AppResult<Vec<u64>> {
        let mut delivered = Vec::new();
        let mut after = 0;
        loop {
            let batch = self
                .store
                .pending_notifications(user_id, after, self.flush_batch)
                .await?;
            let Some(last) = batch.last() else { break };
            after = last.seq;
            let exhausted = batch.len() < self.flush_batch;

            for record in &batch {
                let now = Utc::now();
                if !Self::push(record, connections, now) {
                    // 所有连接都已失效，剩余记录保持 pending / every device is gone
                    return Ok(delivered);
                }
                if self.store.mark_delivered(user_id, record.seq, now).await? {
                    delivered.push(record.seq);
                }
            }
            if exhausted {
                break;
            }
        }
        Ok(delivered)
    }

    /// 推送到所有设备；任一成功即视为送达 / Push to every device; one success is enough
    fn push(record: &NotificationRecord, connections: &[Connection], at: chrono::DateTime<Utc>) -> bool {
        let frame = encode(kind::NOTIFICATION, NotificationPush::new(record, at));
        let mut any = false;
        for connection in connections {
            match connection.send_text(frame.clone()) {
                Ok(()) => any = true,
                Err(e) => warn!(
                    recipient_id = %record.recipient_id,
                    seq = record.seq,
                    "⚠️ soft delivery failure: {}",
                    e
                ),
            }
        }
        any
    }

    /// 标记已读 / Mark one record (by seq) or every record read
    pub async fn mark_read(&self, user_id: &str, seq: Option<u64>) -> AppResult<usize> {
        let updated = self.store.mark_read(user_id, seq).await?;
        debug!(user_id = %user_id, ?seq, updated, "notifications marked read");
        Ok(updated)
    }

    pub async fn mark_all_read(&self, user_id: &str) -> AppResult<usize> {
        self.mark_read(user_id, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::notification::{DeliveryState, EventKind};
    use crate::realtime::pagination::{PageRequest, SortOrder};
    use crate::realtime::store::MemoryStore;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        store: Arc<MemoryStore>,
        dispatcher: NotificationDispatcher,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(ConnectionRegistry::new());
        let store = Arc::new(MemoryStore::new());
        let dispatcher = NotificationDispatcher::new(registry.clone(), store.clone(), 2);
        Fixture { registry, store, dispatcher }
    }

    fn connect(registry: &ConnectionRegistry, id: &str, user: &str) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(Connection::new(id, user, tx)).unwrap();
        rx
    }

    fn seqs(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<u64> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            let value: serde_json::Value = serde_json::from_str(&message.into_text().unwrap()).unwrap();
            assert_eq!(value["kind"], "notification");
            out.push(value["body"]["seq"].as_u64().unwrap());
        }
        out
    }

    async fn records(store: &MemoryStore, user: &str) -> Vec<NotificationRecord> {
        let mut page = store
            .page_notifications(user, &PageRequest::first(100, SortOrder::Asc))
            .await
            .unwrap();
        page.items.sort_by_key(|r| r.seq);
        page.items
    }

    #[tokio::test]
    async fn test_targeted_creates_one_record_per_recipient() {
        let f = fixture();
        f.store.remember_user("outsider").await.unwrap();
        let payload = NotificationPayload::targeted(EventKind::NewBid, "creator", "new bid", ["a", "b", "a"]);
        let result = f.dispatcher.dispatch(&payload).await.unwrap();
        assert_eq!(result.recipients, vec!["a", "b"]);
        assert_eq!(result.pending, vec!["a", "b"]);
        assert_eq!(records(&f.store, "a").await.len(), 1);
        assert_eq!(records(&f.store, "b").await.len(), 1);
        assert!(records(&f.store, "outsider").await.is_empty());
        assert!(records(&f.store, "creator").await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_targeted_is_rejected_before_any_write() {
        let f = fixture();
        let payload = NotificationPayload::targeted(EventKind::NewBid, "creator", "x", Vec::<String>::new());
        let err = f.dispatcher.dispatch(&payload).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidPayload { .. }));
        assert!(f.store.known_users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_public_excludes_creator_and_reaches_every_device() {
        let f = fixture();
        for user in ["creator", "u", "offline"] {
            f.store.remember_user(user).await.unwrap();
        }
        let mut c1 = connect(&f.registry, "c1", "u");
        let mut c2 = connect(&f.registry, "c2", "u");
        let mut creator = connect(&f.registry, "c3", "creator");

        let payload = NotificationPayload::public(EventKind::NewPurchaseRequest, "creator", "new PR");
        let result = f.dispatcher.dispatch(&payload).await.unwrap();
        assert_eq!(result.delivered, vec!["u"]);
        assert_eq!(result.pending, vec!["offline"]);
        assert_eq!(seqs(&mut c1), vec![1]);
        assert_eq!(seqs(&mut c2), vec![1]);
        assert!(seqs(&mut creator).is_empty());
        assert!(records(&f.store, "creator").await.is_empty());
        assert_eq!(records(&f.store, "u").await[0].state, DeliveryState::Delivered);
    }

    #[tokio::test]
    async fn test_offline_records_flush_in_order_on_reconnect() {
        let f = fixture();
        for i in 0..5 {
            let payload = NotificationPayload::targeted(EventKind::Message, "c", &format!("m{}", i), ["u"]);
            f.dispatcher.dispatch(&payload).await.unwrap();
        }
        let mut rx = connect(&f.registry, "c1", "u");
        assert_eq!(f.dispatcher.flush_pending("u").await.unwrap(), 5);
        assert_eq!(seqs(&mut rx), vec![1, 2, 3, 4, 5]);
        assert!(records(&f.store, "u").await.iter().all(|r| r.state == DeliveryState::Delivered));
        assert_eq!(f.dispatcher.flush_pending("u").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dead_connection_is_soft_failure() {
        let f = fixture();
        let dead = connect(&f.registry, "dead", "u");
        drop(dead);
        let mut live = connect(&f.registry, "live", "v");

        let payload = NotificationPayload::targeted(EventKind::BidLocked, "c", "locked", ["u", "v"]);
        let result = f.dispatcher.dispatch(&payload).await.unwrap();
        assert_eq!(result.delivered, vec!["v"]);
        assert_eq!(result.pending, vec!["u"]);
        assert_eq!(seqs(&mut live), vec![1]);
        assert_eq!(records(&f.store, "u").await[0].state, DeliveryState::Pending);
    }

    #[tokio::test]
    async fn test_store_outage_is_retryable() {
        let f = fixture();
        f.store.set_unavailable(true);
        let payload = NotificationPayload::targeted(EventKind::NewBid, "c", "x", ["u"]);
        let err = f.dispatcher.dispatch(&payload).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_concurrent_dispatches_keep_per_recipient_order() {
        let f = Arc::new(fixture());
        let mut rx = connect(&f.registry, "c1", "u");
        let handles: Vec<_> = (0..40)
            .map(|i| {
                let f = f.clone();
                tokio::spawn(async move {
                    let payload = NotificationPayload::targeted(EventKind::Message, "c", &format!("{}", i), ["u"]);
                    f.dispatcher.dispatch(&payload).await.unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(seqs(&mut rx), (1..=40).collect::<Vec<u64>>());
        assert!(f.dispatcher.lanes.is_empty());
    }

    #[tokio::test]
    async fn test_idle_lanes_are_released() {
        let f = fixture();
        let _rx = connect(&f.registry, "c1", "online");
        for user in ["online", "offline-1", "offline-2"] {
            let payload = NotificationPayload::targeted(EventKind::Feedback, "c", "x", [user]);
            f.dispatcher.dispatch(&payload).await.unwrap();
        }
        f.dispatcher.flush_pending("offline-1").await.unwrap();
        assert!(f.dispatcher.lanes.is_empty());

        // 持有期间通道保留 / a held lane stays in the map
        let held = f.dispatcher.lane("online").await;
        assert_eq!(f.dispatcher.lanes.len(), 1);
        drop(held);
        assert!(f.dispatcher.lanes.is_empty());
    }

    #[tokio::test]
    async fn test_mark_all_read() {
        let f = fixture();
        for _ in 0..3 {
            let payload = NotificationPayload::targeted(EventKind::Feedback, "c", "x", ["u"]);
            f.dispatcher.dispatch(&payload).await.unwrap();
        }
        assert_eq!(f.dispatcher.mark_read("u", Some(2)).await.unwrap(), 1);
        assert_eq!(f.dispatcher.mark_all_read("u").await.unwrap(), 2);
        assert!(records(&f.store, "u").await.iter().all(|r| r.state == DeliveryState::Read));
    }
}
