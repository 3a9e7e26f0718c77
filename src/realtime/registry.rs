//! 连接注册表 / Connection registry
//!
//! 维护 用户 -> 活跃连接 的映射，检测在线/离线跳变。
//! Tracks the live connections of every user and reports online/offline transitions.
//! A connection id is owned by at most one user at a time; `owners` is always
//! locked before `users`.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{AppError, AppResult};

/// 推送失败 / Push to a closed connection
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("connection {connection_id} is closed")]
pub struct DeliveryError {
    pub connection_id: String,
}

/// 客户端连接句柄 / Handle to one live client connection
#[derive(Clone, Debug)]
pub struct Connection {
    pub connection_id: String,
    pub user_id: String,
    pub connected_at: i64,
    alive: Arc<AtomicBool>,
    sender: mpsc::UnboundedSender<Message>,
}

impl Connection {
    pub fn new(connection_id: &str, user_id: &str, sender: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            connection_id: connection_id.to_string(),
            user_id: user_id.to_string(),
            connected_at: chrono::Utc::now().timestamp_millis(),
            alive: Arc::new(AtomicBool::new(true)),
            sender,
        }
    }

    /// 推送文本帧 / Push a text frame to the socket writer
    pub fn send_text(&self, text: String) -> Result<(), DeliveryError> {
        self.send(Message::Text(text))
    }

    pub fn send(&self, message: Message) -> Result<(), DeliveryError> {
        if !self.is_alive() {
            return Err(self.closed());
        }
        self.sender.send(message).map_err(|_| {
            self.alive.store(false, Ordering::Release);
            self.closed()
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && !self.sender.is_closed()
    }

    /// 标记为已关闭，后续推送直接失败 / Mark closed; later pushes fail fast
    pub fn mark_closed(&self) {
        self.alive.store(false, Ordering::Release);
    }

    fn closed(&self) -> DeliveryError {
        DeliveryError { connection_id: self.connection_id.clone() }
    }
}

/// 在线状态跳变 / Presence transition caused by a register/unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceChange {
    /// 第一个连接 / first connection of the user
    CameOnline,
    /// 最后一个连接断开 / last connection of the user went away
    WentOffline,
    Unchanged,
}

/// 连接注册表 / Connection registry
#[derive(Default)]
pub struct ConnectionRegistry {
    users: DashMap<String, HashMap<String, Connection>>,
    owners: DashMap<String, String>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册连接 / Register a connection for its user
    ///
    /// 同一用户重复注册同一连接为幂等操作；连接已属于其他用户时返回 `DuplicateConnection`。
    /// Re-registering the same pair is a no-op; a connection id held by another user
    /// is rejected with `DuplicateConnection`.
    pub fn register(&self, connection: Connection) -> AppResult<PresenceChange> {
        match self.owners.entry(connection.connection_id.clone()) {
            Entry::Occupied(owner) => {
                if owner.get() == &connection.user_id {
                    Ok(PresenceChange::Unchanged)
                } else {
                    Err(AppError::DuplicateConnection {
                        connection_id: connection.connection_id.clone(),
                        owner: owner.get().clone(),
                    })
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(connection.user_id.clone());
                let mut set = self.users.entry(connection.user_id.clone()).or_default();
                let came_online = set.is_empty();
                set.insert(connection.connection_id.clone(), connection);
                Ok(if came_online { PresenceChange::CameOnline } else { PresenceChange::Unchanged })
            }
        }
    }

    /// 注销连接 / Remove a connection; unknown ids are a no-op returning `None`
    pub fn unregister(&self, connection_id: &str) -> Option<(String, PresenceChange)> {
        let (_, user_id) = self.owners.remove(connection_id)?;
        let mut went_offline = false;
        if let Some(mut set) = self.users.get_mut(&user_id) {
            if let Some(connection) = set.remove(connection_id) {
                connection.mark_closed();
            }
            went_offline = set.is_empty();
        }
        if went_offline {
            self.users.remove_if(&user_id, |_, set| set.is_empty());
        }
        let change = if went_offline { PresenceChange::WentOffline } else { PresenceChange::Unchanged };
        Some((user_id, change))
    }

    /// 用户当前连接快照 / Snapshot of a user's connections at call time
    pub fn connections_for(&self, user_id: &str) -> Vec<Connection> {
        self.users
            .get(user_id)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.users.get(user_id).map(|set| !set.is_empty()).unwrap_or(false)
    }

    pub fn online_users(&self) -> Vec<String> {
        self.users
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.owners.len()
    }
}
