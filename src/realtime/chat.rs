//! 聊天房间路由 / Chat room router
//!
//! 每个房间一把投递锁：分配序号、写入日志、扇出都在锁内完成，
//! 因此所有在线成员看到的顺序与序号一致。
//! Each room has a post lock held across sequence assignment, the durable append and
//! the fanout, so every online member observes messages in sequence order.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::domain::message::{encode, kind, TypingBody};
use crate::error::{AppError, AppResult};
use crate::realtime::pagination::{Page, PageRequest, Sequenced};
use crate::realtime::registry::ConnectionRegistry;
use crate::realtime::store::RealtimeStore;

/// 聊天消息 / Chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub room_id: String,
    pub sender_id: String,
    pub content: String,
    /// 房间内严格递增，从 1 开始 / strictly increasing per room, starting at 1
    pub seq: u64,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// 尚未分配序号 / Not yet sequenced; the store assigns `seq`
    pub fn unsequenced(room_id: &str, sender_id: &str, content: &str) -> Self {
        Self {
            room_id: room_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            seq: 0,
            created_at: Utc::now(),
        }
    }
}

impl Sequenced for ChatMessage {
    fn seq(&self) -> u64 {
        self.seq
    }
}

#[derive(Default)]
struct Room {
    members: RwLock<BTreeSet<String>>,
    post_lock: Mutex<()>,
}

impl Room {
    fn is_member(&self, user_id: &str) -> bool {
        self.members.read().contains(user_id)
    }

    fn snapshot(&self) -> Vec<String> {
        self.members.read().iter().cloned().collect()
    }
}

pub struct ChatRoomRouter {
    rooms: DashMap<String, Arc<Room>>,
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn RealtimeStore>,
}

impl ChatRoomRouter {
    pub fn new(registry: Arc<ConnectionRegistry>, store: Arc<dyn RealtimeStore>) -> Self {
        Self { rooms: DashMap::new(), registry, store }
    }

    fn room(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.get(room_id).map(|room| room.clone())
    }

    fn room_or_create(&self, room_id: &str) -> Arc<Room> {
        if let Some(room) = self.room(room_id) {
            return room;
        }
        self.rooms.entry(room_id.to_string()).or_default().clone()
    }

    /// 从存储恢复成员关系 / Rebuild membership from the store; returns member count
    pub async fn load_rooms(&self) -> AppResult<usize> {
        let mut total = 0usize;
        for (room_id, members) in self.store.list_rooms().await? {
            let room = self.room_or_create(&room_id);
            let mut set = room.members.write();
            for user_id in members {
                if set.insert(user_id) {
                    total += 1;
                }
            }
        }
        info!("✅ loaded {} room memberships", total);
        Ok(total)
    }

    /// 加入房间（幂等）/ Join a room; `Ok(false)` when already a member
    pub async fn join(&self, room_id: &str, user_id: &str) -> AppResult<bool> {
        let room = self.room_or_create(room_id);
        if room.is_member(user_id) {
            return Ok(false);
        }
        self.store.add_room_member(room_id, user_id).await?;
        let added = room.members.write().insert(user_id.to_string());
        if added {
            debug!(room_id = %room_id, user_id = %user_id, "joined room");
        }
        Ok(added)
    }

    /// 离开房间（幂等）/ Leave a room; `Ok(false)` when not a member
    pub async fn leave(&self, room_id: &str, user_id: &str) -> AppResult<bool> {
        let Some(room) = self.room(room_id) else { return Ok(false) };
        if !room.is_member(user_id) {
            return Ok(false);
        }
        self.store.remove_room_member(room_id, user_id).await?;
        let removed = room.members.write().remove(user_id);
        if removed {
            debug!(room_id = %room_id, user_id = %user_id, "left room");
        }
        Ok(removed)
    }

    /// 发送消息 / Accept a message, sequence it, persist it and fan it out
    ///
    /// 发送者也会收到自己的消息（多设备同步）。
    /// The sender's own devices receive the message too.
    pub async fn post_message(&self, room_id: &str, sender_id: &str, content: &str) -> AppResult<ChatMessage> {
        let room = self
            .room(room_id)
            .ok_or_else(|| AppError::not_a_member(room_id, sender_id))?;

        let _post = room.post_lock.lock().await;
        if !room.is_member(sender_id) {
            return Err(AppError::not_a_member(room_id, sender_id));
        }

        let message = self
            .store
            .append_chat_message(ChatMessage::unsequenced(room_id, sender_id, content))
            .await?;

        let frame = encode(kind::CHAT_MESSAGE, &message);
        let reached = self.fanout(&room.snapshot(), None, &frame);
        debug!(room_id = %room_id, seq = message.seq, reached, "💬 chat message fanned out");
        Ok(message)
    }

    /// 转发输入状态给其他成员 / Relay a typing indicator to the other members
    pub fn relay_typing(&self, room_id: &str, user_id: &str, is_typing: bool) -> AppResult<usize> {
        let room = self
            .room(room_id)
            .filter(|room| room.is_member(user_id))
            .ok_or_else(|| AppError::not_a_member(room_id, user_id))?;
        let frame = encode(kind::CHAT_TYPING, TypingBody { room_id, user_id, is_typing });
        Ok(self.fanout(&room.snapshot(), Some(user_id), &frame))
    }

    fn fanout(&self, members: &[String], skip: Option<&str>, frame: &str) -> usize {
        let mut reached = 0;
        for member in members.iter().filter(|m| Some(m.as_str()) != skip) {
            for connection in self.registry.connections_for(member) {
                match connection.send_text(frame.to_string()) {
                    Ok(()) => reached += 1,
                    Err(e) => warn!(user_id = %member, "⚠️ chat push skipped: {}", e),
                }
            }
        }
        reached
    }

    /// 聊天历史（需为成员）/ Paged history; members only when a reader is given
    pub async fn history(
        &self,
        room_id: &str,
        reader_id: Option<&str>,
        request: &PageRequest,
    ) -> AppResult<Page<ChatMessage>> {
        if let Some(reader_id) = reader_id {
            if !self.is_member(room_id, reader_id) {
                return Err(AppError::not_a_member(room_id, reader_id));
            }
        }
        self.store.page_chat_messages(room_id, request).await
    }

    /// 房间是否存在（加入过或从存储恢复）/ Room was ever joined or restored
    pub fn room_exists(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn is_member(&self, room_id: &str, user_id: &str) -> bool {
        self.room(room_id).map(|room| room.is_member(user_id)).unwrap_or(false)
    }

    pub fn members(&self, room_id: &str) -> Vec<String> {
        self.room(room_id).map(|room| room.snapshot()).unwrap_or_default()
    }

    /// 用户所在房间 / Rooms the user belongs to, sorted
    pub fn rooms_for(&self, user_id: &str) -> Vec<String> {
        let mut rooms: Vec<String> = self
            .rooms
            .iter()
            .filter(|entry| entry.value().is_member(user_id))
            .map(|entry| entry.key().clone())
            .collect();
        rooms.sort();
        rooms
    }
}
