//! Presence tracking
//!
//! Which users currently hold at least one authenticated socket. Presence is
//! best-effort and process-local; nothing here is persisted.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use uuid::Uuid;

/// Identity of one socket connection
pub type ConnectionId = Uuid;

pub trait PresenceTracker: Send + Sync {
    /// Record `conn` as a live connection of `user_id`.
    /// Returns true when the user was offline before this call.
    fn set_online(&self, user_id: &str, conn: ConnectionId) -> bool;

    /// Drop `conn`. Returns true when this was the user's last connection.
    fn set_offline(&self, user_id: &str, conn: ConnectionId) -> bool;

    fn is_online(&self, user_id: &str) -> bool;

    /// When the user last went offline, if they did since startup
    fn last_seen(&self, user_id: &str) -> Option<DateTime<Utc>>;

    fn online_users(&self) -> Vec<String>;
}

/// `DashMap`-backed tracker for a single server process
#[derive(Default)]
pub struct InMemoryPresence {
    online: DashMap<String, HashSet<ConnectionId>>,
    last_seen: DashMap<String, DateTime<Utc>>,
}

impl InMemoryPresence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PresenceTracker for InMemoryPresence {
    fn set_online(&self, user_id: &str, conn: ConnectionId) -> bool {
        let mut entry = self.online.entry(user_id.to_string()).or_default();
        let was_offline = entry.is_empty();
        entry.insert(conn);
        was_offline
    }

    fn set_offline(&self, user_id: &str, conn: ConnectionId) -> bool {
        let now_offline = match self.online.get_mut(user_id) {
            Some(mut conns) => {
                if !conns.remove(&conn) {
                    return false;
                }
                conns.is_empty()
            }
            None => return false,
        };

        if now_offline {
            self.online.remove_if(user_id, |_, conns| conns.is_empty());
            self.last_seen.insert(user_id.to_string(), Utc::now());
        }

        now_offline
    }

    fn is_online(&self, user_id: &str) -> bool {
        self.online.get(user_id).map(|c| !c.is_empty()).unwrap_or(false)
    }

    fn last_seen(&self, user_id: &str) -> Option<DateTime<Utc>> {
        self.last_seen.get(user_id).map(|t| *t)
    }

    fn online_users(&self) -> Vec<String> {
        self.online
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect()
    }
}
