//! 实时通知与聊天核心 / Real-time notification and chat core

pub mod chat;
pub mod dispatcher;
pub mod identity;
pub mod notification;
pub mod pagination;
pub mod presence;
pub mod registry;
pub mod report;
pub mod store;
pub mod validation;

pub use chat::{ChatMessage, ChatRoomRouter};
pub use dispatcher::NotificationDispatcher;
pub use identity::{IdentityProvider, SharedSecretIdentity};
pub use notification::{DispatchResult, EventKind, NotificationPayload, NotificationRecord, Visibility};
pub use pagination::{Cursor, Page, PageRequest, PaginationService, SortOrder};
pub use registry::{Connection, ConnectionRegistry, PresenceChange};
pub use store::{MemoryStore, RealtimeStore};
pub use validation::{SchemaRegistry, ValidatedPayload, ValidationError};
