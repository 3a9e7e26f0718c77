//! 通知数据模型 / Notification data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::realtime::pagination::Sequenced;

/// 事件类型（封闭集合）/ Domain event kind, closed set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum EventKind {
    #[serde(rename = "NEW PURCHASE REQUEST")]
    NewPurchaseRequest,
    #[serde(rename = "MESSAGE")]
    Message,
    #[serde(rename = "BID INVITATION")]
    BidInvitation,
    #[serde(rename = "COMPANY NEEDS VERIFICATION")]
    CompanyNeedsVerification,
    #[serde(rename = "COMPANY JOINING REQUEST")]
    CompanyJoiningRequest,
    #[serde(rename = "COMPANY VERIFIED")]
    CompanyVerified,
    #[serde(rename = "COMPANY NOT VERIFIED")]
    CompanyNotVerified,
    #[serde(rename = "PURCHASE REQUEST POSTPONED")]
    PurchaseRequestPostponed,
    #[serde(rename = "DISQUALIFIED")]
    Disqualified,
    #[serde(rename = "NEW BID")]
    NewBid,
    #[serde(rename = "FEEDBACK")]
    Feedback,
    #[serde(rename = "WINNING BID")]
    WinningBid,
    #[serde(rename = "BID LOCKED")]
    BidLocked,
    #[serde(rename = "BID DUE DATE")]
    BidDueDate,
    #[serde(rename = "PURCHASE REQUEST CANCELLED")]
    PurchaseRequestCancelled,
    #[serde(rename = "SUPPLIER NEEDS A COMPANY")]
    SupplierNeedsACompany,
    #[serde(rename = "REPORT REPLY")]
    ReportReply,
}

/// 可见性 / Visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// 所有已知用户（创建者除外）/ every known user except the creator
    Public,
    /// 显式接收者列表 / explicit recipient list
    Targeted,
}

/// 关联的领域对象 / References to the originating domain object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DomainRefs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_id: Option<String>,
}

/// 不可变通知载荷 / Immutable description of a domain event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub id: Uuid,
    pub kind: EventKind,
    pub creator_id: String,
    pub message: String,
    pub visibility: Visibility,
    /// 公开通知忽略此字段 / ignored for public payloads
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub refs: DomainRefs,
    pub created_at: DateTime<Utc>,
}

impl NotificationPayload {
    fn build(kind: EventKind, creator_id: &str, message: &str, visibility: Visibility, recipients: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            creator_id: creator_id.to_string(),
            message: message.to_string(),
            visibility,
            recipients,
            refs: DomainRefs::default(),
            created_at: Utc::now(),
        }
    }

    /// 公开通知 / Public notification
    pub fn public(kind: EventKind, creator_id: &str, message: &str) -> Self {
        Self::build(kind, creator_id, message, Visibility::Public, Vec::new())
    }

    /// 定向通知 / Targeted notification
    pub fn targeted<I, S>(kind: EventKind, creator_id: &str, message: &str, recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let recipients = recipients.into_iter().map(Into::into).collect();
        Self::build(kind, creator_id, message, Visibility::Targeted, recipients)
    }

    pub fn with_refs(mut self, refs: DomainRefs) -> Self {
        self.refs = refs;
        self
    }
}

/// 投递状态（只前进）/ Delivery state, only ever moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Pending,
    Delivered,
    Read,
}

impl DeliveryState {
    /// 推进到目标状态；不会回退 / Advance towards `target`, never backwards
    pub fn advance(self, target: DeliveryState) -> DeliveryState {
        self.max(target)
    }
}

/// 每个接收者一条的通知记录 / A payload bound to one recipient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub notification_id: Uuid,
    pub recipient_id: String,
    /// 接收者内严格递增 / strictly increasing per recipient, starting at 1
    pub seq: u64,
    pub kind: EventKind,
    pub creator_id: String,
    pub message: String,
    pub refs: DomainRefs,
    pub state: DeliveryState,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
}

impl NotificationRecord {
    /// 尚未分配序号的待投递记录 / Pending record; the store assigns `seq`
    pub fn pending(payload: &NotificationPayload, recipient_id: &str) -> Self {
        Self {
            notification_id: payload.id,
            recipient_id: recipient_id.to_string(),
            seq: 0,
            kind: payload.kind,
            creator_id: payload.creator_id.clone(),
            message: payload.message.clone(),
            refs: payload.refs.clone(),
            state: DeliveryState::Pending,
            created_at: payload.created_at,
            delivered_at: None,
        }
    }
}

impl Sequenced for NotificationRecord {
    fn seq(&self) -> u64 {
        self.seq
    }
}

/// 推送帧 body / Body of the outbound `notification` frame
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPush<'a> {
    pub notification_id: Uuid,
    pub kind: EventKind,
    pub creator_id: &'a str,
    pub message: &'a str,
    pub refs: &'a DomainRefs,
    pub seq: u64,
    pub delivered_at: DateTime<Utc>,
}

impl<'a> NotificationPush<'a> {
    pub fn new(record: &'a NotificationRecord, delivered_at: DateTime<Utc>) -> Self {
        Self {
            notification_id: record.notification_id,
            kind: record.kind,
            creator_id: &record.creator_id,
            message: &record.message,
            refs: &record.refs,
            seq: record.seq,
            delivered_at,
        }
    }
}

/// 分发结果 / Outcome of one dispatch call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResult {
    pub notification_id: Option<Uuid>,
    /// 创建了记录的接收者 / recipients a record was created for
    pub recipients: Vec<String>,
    /// 至少一个连接收到推送 / pushed to at least one live connection
    pub delivered: Vec<String>,
    /// 离线，记录保持 pending / offline, record stays pending
    pub pending: Vec<String>,
    /// 存储写入失败 / store write failed; no record exists for these
    pub failed: Vec<String>,
}
