//! 报告回复 / Report replies
//!
//! 回复按报告内序号保存，最新在前分页；新回复会通知报告所有者与此前的回复者。
//! Replies are sequenced per report and paged newest first. A new reply notifies the
//! report owner and earlier reply authors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::error::AppResult;
use crate::realtime::dispatcher::NotificationDispatcher;
use crate::realtime::notification::{DomainRefs, EventKind, NotificationPayload};
use crate::realtime::pagination::{Cursor, Page, PaginationService, Sequenced, SortOrder};
use crate::realtime::store::RealtimeStore;
use crate::realtime::validation::{FieldIssue, ValidationError, MAX_CONTENT_LEN};

/// 报告回复 / Report reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReportReply {
    pub report_id: String,
    pub author_id: String,
    pub message: String,
    pub seq: u64,
    pub created_at: DateTime<Utc>,
}

impl Sequenced for ReportReply {
    fn seq(&self) -> u64 {
        self.seq
    }
}

/// 回复分页结果 / Reply page with totals
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPage {
    pub replies: Vec<ReportReply>,
    pub total: u64,
    pub page: u32,
    pub limit: usize,
    pub total_pages: u64,
    pub next_cursor: Option<String>,
}

/// 报告回复默认页大小 / Default reply page size
pub const DEFAULT_REPLY_LIMIT: usize = 10;

pub struct ReportService {
    store: Arc<dyn RealtimeStore>,
    dispatcher: Arc<NotificationDispatcher>,
    pagination: PaginationService,
}

impl ReportService {
    pub fn new(
        store: Arc<dyn RealtimeStore>,
        dispatcher: Arc<NotificationDispatcher>,
        pagination: PaginationService,
    ) -> Self {
        Self { store, dispatcher, pagination }
    }

    /// 添加回复 / Append a reply, then notify the other participants
    pub async fn add_reply(
        &self,
        report_id: &str,
        author_id: &str,
        message: &str,
        report_owner_id: Option<&str>,
    ) -> AppResult<ReportReply> {
        let mut issues = Vec::new();
        if author_id.trim().is_empty() {
            issues.push(FieldIssue::new("authorId", "must not be empty"));
        }
        if message.trim().is_empty() {
            issues.push(FieldIssue::new("message", "must not be empty"));
        } else if message.chars().count() > MAX_CONTENT_LEN {
            issues.push(FieldIssue::new("message", format!("must be at most {} characters", MAX_CONTENT_LEN)));
        }
        if !issues.is_empty() {
            return Err(ValidationError::new(issues).into());
        }

        let (reply, previous_authors) = self
            .store
            .append_report_reply(ReportReply {
                report_id: report_id.to_string(),
                author_id: author_id.to_string(),
                message: message.to_string(),
                seq: 0,
                created_at: Utc::now(),
            })
            .await?;
        info!(report_id = %report_id, seq = reply.seq, "📝 report reply added");

        let recipients: Vec<String> = report_owner_id
            .into_iter()
            .map(str::to_string)
            .chain(previous_authors)
            .filter(|r| r != author_id)
            .collect();
        if !recipients.is_empty() {
            let payload = NotificationPayload::targeted(
                EventKind::ReportReply,
                author_id,
                &format!("New reply on report {}", report_id),
                recipients,
            )
            .with_refs(DomainRefs { report_id: Some(report_id.to_string()), ..Default::default() });
            // 回复已保存；通知失败只记录日志 / the reply is stored, notification is best effort
            if let Err(e) = self.dispatcher.dispatch(&payload).await {
                warn!(report_id = %report_id, "reply notification failed: {}", e);
            }
        }
        Ok(reply)
    }

    /// 回复分页（最新在前）/ Page replies newest first
    ///
    /// `head` 取自上一页的游标，固定视图使后续页不因新回复偏移。
    /// `head` comes from the previous page's cursor and pins the view, so later pages
    /// never shift when new replies arrive.
    pub async fn replies(
        &self,
        report_id: &str,
        page: Option<u32>,
        head: Option<u64>,
        limit: Option<usize>,
    ) -> AppResult<ReplyPage> {
        let limit = limit.or(Some(DEFAULT_REPLY_LIMIT));
        let request = self.pagination.page_number_request(page, head, limit, SortOrder::Desc)?;
        let page_number = match request.cursor {
            Some(Cursor::Page { page, .. }) => page,
            _ => 1,
        };

        let Page { items, next_cursor } = self.store.page_report_replies(report_id, &request).await?;
        let count = self.store.count_report_replies(report_id).await?;
        // 回复序号从 1 连续分配 / reply seqs are gapless from 1
        let total = head.map_or(count, |head| count.min(head));
        let total_pages = total.div_ceil(request.limit as u64);

        Ok(ReplyPage {
            replies: items,
            total,
            page: page_number,
            limit: request.limit,
            total_pages,
            next_cursor: next_cursor.map(|c| c.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::pagination::PageRequest;
    use crate::realtime::registry::ConnectionRegistry;
    use crate::realtime::store::MemoryStore;

    fn service() -> (Arc<MemoryStore>, ReportService) {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Arc::new(NotificationDispatcher::new(registry, store.clone(), 10));
        let service = ReportService::new(store.clone(), dispatcher, PaginationService::new(20, 100));
        (store, service)
    }

    #[tokio::test]
    async fn test_replies_page_newest_first() {
        let (_store, service) = service();
        for i in 1..=7 {
            service.add_reply("r1", "author", &format!("reply {}", i), None).await.unwrap();
        }
        let first = service.replies("r1", Some(1), None, Some(5)).await.unwrap();
        assert_eq!(first.total, 7);
        assert_eq!(first.total_pages, 2);
        assert_eq!(first.replies[0].message, "reply 7");
        assert_eq!(first.next_cursor.as_deref(), Some("p:2@7"));

        let second = service.replies("r1", Some(2), Some(7), Some(5)).await.unwrap();
        let messages: Vec<&str> = second.replies.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, vec!["reply 2", "reply 1"]);
        assert_eq!(second.next_cursor, None);
    }

    #[tokio::test]
    async fn test_reply_notifies_owner_and_previous_authors() {
        let (store, service) = service();
        service.add_reply("r1", "alice", "first", Some("owner")).await.unwrap();
        service.add_reply("r1", "bob", "second", Some("owner")).await.unwrap();

        let request = PageRequest::first(10, SortOrder::Desc);
        let owner = store.page_notifications("owner", &request).await.unwrap();
        assert_eq!(owner.items.len(), 2);
        assert_eq!(owner.items[0].kind, EventKind::ReportReply);
        assert_eq!(owner.items[0].refs.report_id.as_deref(), Some("r1"));
        let alice = store.page_notifications("alice", &request).await.unwrap();
        assert_eq!(alice.items.len(), 1);
        let bob = store.page_notifications("bob", &request).await.unwrap();
        assert!(bob.items.is_empty());
    }

    #[tokio::test]
    async fn test_new_reply_between_pages_is_not_repeated() {
        let (_store, service) = service();
        for i in 1..=6 {
            service.add_reply("r1", "author", &format!("reply {}", i), None).await.unwrap();
        }
        let first = service.replies("r1", None, None, Some(5)).await.unwrap();
        let seqs: Vec<u64> = first.replies.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![6, 5, 4, 3, 2]);
        let next: Cursor = first.next_cursor.as_deref().unwrap().parse().unwrap();
        assert_eq!(next, Cursor::Page { page: 2, head: Some(6) });

        service.add_reply("r1", "author", "reply 7", None).await.unwrap();

        let Cursor::Page { page, head } = next else { unreachable!() };
        let second = service.replies("r1", Some(page), head, Some(5)).await.unwrap();
        let seqs: Vec<u64> = second.replies.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1]);
        assert_eq!(second.total, 6);
        assert_eq!(second.next_cursor, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_replies_notify_every_earlier_author() {
        let (store, service) = service();
        let service = Arc::new(service);
        let handles: Vec<_> = (0..12)
            .map(|i| {
                let service = service.clone();
                tokio::spawn(async move { service.add_reply("r1", &format!("author{}", i), "hi", None).await.unwrap() })
            })
            .collect();
        let mut replies = Vec::new();
        for handle in handles {
            replies.push(handle.await.unwrap());
        }
        replies.sort_by_key(|r| r.seq);

        // 每位作者收到其后每条回复的通知 / each author hears about every later reply
        let request = PageRequest::first(50, SortOrder::Desc);
        for (index, reply) in replies.iter().enumerate() {
            let received = store.page_notifications(&reply.author_id, &request).await.unwrap();
            assert_eq!(received.items.len(), replies.len() - index - 1, "{}", reply.author_id);
        }
    }

    #[tokio::test]
    async fn test_empty_reply_rejected() {
        let (_store, service) = service();
        let err = service.add_reply("r1", "", " ", None).await.unwrap_err();
        assert_eq!(err.details(), "authorId: must not be empty, message: must not be empty");
        assert!(service.replies("r1", Some(0), None, None).await.is_err());
    }
}
