//! 持久化存储接口 / Durable store seam
//!
//! 序号由存储分配：每个计数器（接收者、房间、报告）只有一个写入点，
//! 在对应的键锁内完成分配与追加。
//! Sequence numbers are assigned here. Every counter (recipient, room, report) has a
//! single authority: allocation and append happen under that key's lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::realtime::chat::ChatMessage;
use crate::realtime::notification::{DeliveryState, NotificationRecord};
use crate::realtime::pagination::{paginate_sequenced, Page, PageRequest};
use crate::realtime::report::ReportReply;

/// 存储接口 / Store operations used by the real-time core
#[async_trait]
pub trait RealtimeStore: Send + Sync {
    /// 记录用户为已知用户 / Remember a user as known (public fanout audience)
    async fn remember_user(&self, user_id: &str) -> AppResult<()>;

    async fn known_users(&self) -> AppResult<Vec<String>>;

    /// 追加记录并分配接收者序号 / Append, assigning the next per-recipient seq
    async fn append_notification(&self, record: NotificationRecord) -> AppResult<NotificationRecord>;

    /// pending -> delivered；返回是否发生跳变 / Returns whether the state changed
    async fn mark_delivered(&self, recipient_id: &str, seq: u64, at: DateTime<Utc>) -> AppResult<bool>;

    /// 标记已读：指定序号或全部 / Mark one record (by seq) or all records read
    async fn mark_read(&self, recipient_id: &str, seq: Option<u64>) -> AppResult<usize>;

    /// 序号大于 `after_seq` 的待投递记录，升序 / Pending records past `after_seq`, ascending
    async fn pending_notifications(
        &self,
        recipient_id: &str,
        after_seq: u64,
        limit: usize,
    ) -> AppResult<Vec<NotificationRecord>>;

    async fn page_notifications(
        &self,
        recipient_id: &str,
        request: &PageRequest,
    ) -> AppResult<Page<NotificationRecord>>;

    /// 追加聊天消息并分配房间序号 / Append, assigning the next per-room seq
    async fn append_chat_message(&self, message: ChatMessage) -> AppResult<ChatMessage>;

    async fn page_chat_messages(&self, room_id: &str, request: &PageRequest) -> AppResult<Page<ChatMessage>>;

    async fn add_room_member(&self, room_id: &str, user_id: &str) -> AppResult<()>;

    async fn remove_room_member(&self, room_id: &str, user_id: &str) -> AppResult<()>;

    /// 所有房间及成员 / Every room with its members
    async fn list_rooms(&self) -> AppResult<Vec<(String, Vec<String>)>>;

    /// 追加报告回复并分配报告序号，同时返回此前的回复者（去重，按首次出现）
    /// Append, assigning the next per-report seq. Also returns the distinct authors of
    /// every earlier reply, in first-appearance order, read atomically with the append.
    async fn append_report_reply(&self, reply: ReportReply) -> AppResult<(ReportReply, Vec<String>)>;

    async fn page_report_replies(&self, report_id: &str, request: &PageRequest) -> AppResult<Page<ReportReply>>;

    async fn count_report_replies(&self, report_id: &str) -> AppResult<u64>;
}

type Log<T> = Arc<Mutex<Vec<T>>>;

/// 内存存储 / In-memory store
#[derive(Default)]
pub struct MemoryStore {
    users: DashSet<String>,
    notifications: DashMap<String, Log<NotificationRecord>>,
    chat: DashMap<String, Log<ChatMessage>>,
    rooms: DashMap<String, BTreeSet<String>>,
    replies: DashMap<String, Log<ReportReply>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟存储故障（测试用）/ Make every call fail with `StoreUnavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> AppResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(AppError::store_unavailable("memory store is offline"))
        } else {
            Ok(())
        }
    }

    /// 取得键对应的日志；DashMap 分片锁只在此处短暂持有
    /// Fetch the per-key log; the shard lock is released before the log is locked
    fn log<T>(map: &DashMap<String, Log<T>>, key: &str) -> Log<T> {
        if let Some(log) = map.get(key) {
            return log.clone();
        }
        map.entry(key.to_string()).or_default().clone()
    }

    fn existing<T>(map: &DashMap<String, Log<T>>, key: &str) -> Option<Log<T>> {
        map.get(key).map(|log| log.clone())
    }
}

#[async_trait]
impl RealtimeStore for MemoryStore {
    async fn remember_user(&self, user_id: &str) -> AppResult<()> {
        self.ensure_available()?;
        self.users.insert(user_id.to_string());
        Ok(())
    }

    async fn known_users(&self) -> AppResult<Vec<String>> {
        self.ensure_available()?;
        let mut users: Vec<String> = self.users.iter().map(|u| u.clone()).collect();
        users.sort();
        Ok(users)
    }

    async fn append_notification(&self, mut record: NotificationRecord) -> AppResult<NotificationRecord> {
        self.ensure_available()?;
        self.users.insert(record.recipient_id.clone());
        let log = Self::log(&self.notifications, &record.recipient_id);
        let mut log = log.lock();
        record.seq = log.len() as u64 + 1;
        log.push(record.clone());
        Ok(record)
    }

    async fn mark_delivered(&self, recipient_id: &str, seq: u64, at: DateTime<Utc>) -> AppResult<bool> {
        self.ensure_available()?;
        let Some(log) = Self::existing(&self.notifications, recipient_id) else {
            return Ok(false);
        };
        let mut log = log.lock();
        let Some(record) = seq.checked_sub(1).and_then(|i| log.get_mut(i as usize)) else {
            return Ok(false);
        };
        if record.state != DeliveryState::Pending {
            return Ok(false);
        }
        record.state = DeliveryState::Delivered;
        record.delivered_at = Some(at);
        Ok(true)
    }

    async fn mark_read(&self, recipient_id: &str, seq: Option<u64>) -> AppResult<usize> {
        self.ensure_available()?;
        let Some(log) = Self::existing(&self.notifications, recipient_id) else {
            return Ok(0);
        };
        let mut log = log.lock();
        let now = Utc::now();
        let mut changed = 0;
        for record in log.iter_mut().filter(|r| seq.map_or(true, |s| r.seq == s)) {
            if record.state != DeliveryState::Read {
                record.state = record.state.advance(DeliveryState::Read);
                record.delivered_at.get_or_insert(now);
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn pending_notifications(
        &self,
        recipient_id: &str,
        after_seq: u64,
        limit: usize,
    ) -> AppResult<Vec<NotificationRecord>> {
        self.ensure_available()?;
        let Some(log) = Self::existing(&self.notifications, recipient_id) else {
            return Ok(Vec::new());
        };
        let log = log.lock();
        Ok(log
            .iter()
            .filter(|r| r.seq > after_seq && r.state == DeliveryState::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn page_notifications(
        &self,
        recipient_id: &str,
        request: &PageRequest,
    ) -> AppResult<Page<NotificationRecord>> {
        self.ensure_available()?;
        Ok(match Self::existing(&self.notifications, recipient_id) {
            Some(log) => paginate_sequenced(&log.lock(), request),
            None => Page::empty(),
        })
    }

    async fn append_chat_message(&self, mut message: ChatMessage) -> AppResult<ChatMessage> {
        self.ensure_available()?;
        let log = Self::log(&self.chat, &message.room_id);
        let mut log = log.lock();
        message.seq = log.len() as u64 + 1;
        log.push(message.clone());
        Ok(message)
    }

    async fn page_chat_messages(&self, room_id: &str, request: &PageRequest) -> AppResult<Page<ChatMessage>> {
        self.ensure_available()?;
        Ok(match Self::existing(&self.chat, room_id) {
            Some(log) => paginate_sequenced(&log.lock(), request),
            None => Page::empty(),
        })
    }

    async fn add_room_member(&self, room_id: &str, user_id: &str) -> AppResult<()> {
        self.ensure_available()?;
        self.rooms.entry(room_id.to_string()).or_default().insert(user_id.to_string());
        Ok(())
    }

    async fn remove_room_member(&self, room_id: &str, user_id: &str) -> AppResult<()> {
        self.ensure_available()?;
        if let Some(mut members) = self.rooms.get_mut(room_id) {
            members.remove(user_id);
        }
        Ok(())
    }

    async fn list_rooms(&self) -> AppResult<Vec<(String, Vec<String>)>> {
        self.ensure_available()?;
        let mut rooms: Vec<(String, Vec<String>)> = self
            .rooms
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().iter().cloned().collect()))
            .collect();
        rooms.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(rooms)
    }

    async fn append_report_reply(&self, mut reply: ReportReply) -> AppResult<(ReportReply, Vec<String>)> {
        self.ensure_available()?;
        let log = Self::log(&self.replies, &reply.report_id);
        let mut log = log.lock();
        let mut authors: Vec<String> = Vec::new();
        for earlier in log.iter() {
            if !authors.contains(&earlier.author_id) {
                authors.push(earlier.author_id.clone());
            }
        }
        reply.seq = log.len() as u64 + 1;
        log.push(reply.clone());
        Ok((reply, authors))
    }

    async fn page_report_replies(&self, report_id: &str, request: &PageRequest) -> AppResult<Page<ReportReply>> {
        self.ensure_available()?;
        Ok(match Self::existing(&self.replies, report_id) {
            Some(log) => paginate_sequenced(&log.lock(), request),
            None => Page::empty(),
        })
    }

    async fn count_report_replies(&self, report_id: &str) -> AppResult<u64> {
        self.ensure_available()?;
        Ok(Self::existing(&self.replies, report_id).map_or(0, |log| log.lock().len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::notification::{EventKind, NotificationPayload};
    use crate::realtime::pagination::SortOrder;

    fn record(recipient: &str) -> NotificationRecord {
        let payload = NotificationPayload::targeted(EventKind::NewBid, "creator", "bid", [recipient]);
        NotificationRecord::pending(&payload, recipient)
    }

    #[tokio::test]
    async fn test_notification_seq_is_per_recipient() {
        let store = MemoryStore::new();
        assert_eq!(store.append_notification(record("a")).await.unwrap().seq, 1);
        assert_eq!(store.append_notification(record("a")).await.unwrap().seq, 2);
        assert_eq!(store.append_notification(record("b")).await.unwrap().seq, 1);
        assert_eq!(store.known_users().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_state_transitions_only_move_forward() {
        let store = MemoryStore::new();
        store.append_notification(record("a")).await.unwrap();
        assert!(store.mark_delivered("a", 1, Utc::now()).await.unwrap());
        assert!(!store.mark_delivered("a", 1, Utc::now()).await.unwrap());
        assert_eq!(store.mark_read("a", None).await.unwrap(), 1);
        assert!(!store.mark_delivered("a", 1, Utc::now()).await.unwrap());
        let page = store.page_notifications("a", &PageRequest::first(10, SortOrder::Desc)).await.unwrap();
        assert_eq!(page.items[0].state, DeliveryState::Read);
    }

    #[tokio::test]
    async fn test_pending_skips_delivered() {
        let store = MemoryStore::new();
        for _ in 0..3 {
            store.append_notification(record("a")).await.unwrap();
        }
        store.mark_delivered("a", 2, Utc::now()).await.unwrap();
        let pending = store.pending_notifications("a", 0, 10).await.unwrap();
        assert_eq!(pending.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![1, 3]);
        let pending = store.pending_notifications("a", 1, 10).await.unwrap();
        assert_eq!(pending.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![3]);
    }

    #[tokio::test]
    async fn test_unavailable_store_is_retryable() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let err = store.append_notification(record("a")).await.unwrap_err();
        assert!(err.is_retryable());
        store.set_unavailable(false);
        assert!(store.append_notification(record("a")).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_appends_have_no_gaps() {
        let store = Arc::new(MemoryStore::new());
        let handles: Vec<_> = (0..50)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.append_notification(record("a")).await.unwrap().seq })
            })
            .collect();
        let mut seqs = Vec::new();
        for handle in handles {
            seqs.push(handle.await.unwrap());
        }
        seqs.sort();
        assert_eq!(seqs, (1..=50).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_room_membership_round_trip() {
        let store = MemoryStore::new();
        store.add_room_member("R1", "a").await.unwrap();
        store.add_room_member("R1", "b").await.unwrap();
        store.add_room_member("R1", "a").await.unwrap();
        store.remove_room_member("R1", "b").await.unwrap();
        assert_eq!(store.list_rooms().await.unwrap(), vec![("R1".to_string(), vec!["a".to_string()])]);
    }

    #[tokio::test]
    async fn test_reply_append_returns_earlier_authors() {
        let store = MemoryStore::new();
        let reply = |author: &str| ReportReply {
            report_id: "r1".to_string(),
            author_id: author.to_string(),
            message: "text".to_string(),
            seq: 0,
            created_at: Utc::now(),
        };
        let (first, authors) = store.append_report_reply(reply("a")).await.unwrap();
        assert_eq!((first.seq, authors), (1, Vec::<String>::new()));
        store.append_report_reply(reply("b")).await.unwrap();
        store.append_report_reply(reply("a")).await.unwrap();
        let (last, authors) = store.append_report_reply(reply("c")).await.unwrap();
        assert_eq!(last.seq, 4);
        assert_eq!(authors, vec!["a".to_string(), "b".to_string()]);
    }
}
