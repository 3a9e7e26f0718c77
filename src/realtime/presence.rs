//! 在线状态广播 / Presence broadcast

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::message::{encode, kind};
use crate::realtime::registry::{ConnectionRegistry, PresenceChange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    pub fn from_change(change: PresenceChange) -> Option<Self> {
        match change {
            PresenceChange::CameOnline => Some(PresenceStatus::Online),
            PresenceChange::WentOffline => Some(PresenceStatus::Offline),
            PresenceChange::Unchanged => None,
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PresenceBody<'a> {
    user_id: &'a str,
    status: PresenceStatus,
}

pub struct PresenceBroadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl PresenceBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// 通知除本人外的所有在线用户 / Tell every other online user; returns connections reached
    pub fn announce(&self, user_id: &str, status: PresenceStatus) -> usize {
        let frame = encode(kind::PRESENCE_CHANGED, PresenceBody { user_id, status });
        let mut reached = 0;
        for other in self.registry.online_users() {
            if other == user_id {
                continue;
            }
            for connection in self.registry.connections_for(&other) {
                match connection.send_text(frame.clone()) {
                    Ok(()) => reached += 1,
                    Err(e) => warn!(user_id = %other, "presence push skipped: {}", e),
                }
            }
        }
        debug!(user_id = %user_id, ?status, reached, "presence announced");
        reached
    }
}
