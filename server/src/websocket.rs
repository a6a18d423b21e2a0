//! Realtime Gateway connection and room registry
//!
//! Every authenticated socket is a [`Connection`] with its own outbound
//! channel. Rooms are sets of connection ids keyed by the wire-level room name.

use dashmap::DashMap;
use std::collections::HashSet;
use tokio::sync::mpsc;

use crate::models::{ChatTarget, WsServerMessage};
use crate::presence::ConnectionId;

/// A broadcast destination
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomAddress {
    Individual(String),
    Event(String),
    Admin,
}

impl RoomAddress {
    pub fn room_name(&self) -> String {
        match self {
            RoomAddress::Individual(user_id) => format!("user-{}", user_id),
            RoomAddress::Event(event_id) => format!("event-{}", event_id),
            RoomAddress::Admin => "admin".to_string(),
        }
    }
}

impl From<&ChatTarget> for RoomAddress {
    fn from(target: &ChatTarget) -> Self {
        match target {
            ChatTarget::Individual(user_id) => RoomAddress::Individual(user_id.clone()),
            ChatTarget::Event(event_id) => RoomAddress::Event(event_id.clone()),
        }
    }
}

/// Represents an active WebSocket connection
#[derive(Clone)]
pub struct Connection {
    pub user_id: String,
    pub sender: mpsc::UnboundedSender<WsServerMessage>,
    rooms: HashSet<String>,
}

/// Manages all active WebSocket connections and their room membership
#[derive(Default)]
pub struct Gateway {
    connections: DashMap<ConnectionId, Connection>,
    rooms: DashMap<String, HashSet<ConnectionId>>,
}

impl Gateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an authenticated connection and join its personal room
    pub fn register(&self, conn: ConnectionId, user_id: &str, sender: mpsc::UnboundedSender<WsServerMessage>) {
        self.connections.insert(
            conn,
            Connection {
                user_id: user_id.to_string(),
                sender,
                rooms: HashSet::new(),
            },
        );
        self.join(conn, &RoomAddress::Individual(user_id.to_string()));

        tracing::info!("Connection registered: user={}, conn={}", user_id, conn);
    }

    pub fn join(&self, conn: ConnectionId, room: &RoomAddress) {
        let name = room.room_name();
        match self.connections.get_mut(&conn) {
            Some(mut connection) => {
                connection.rooms.insert(name.clone());
            }
            None => return,
        }
        self.rooms.entry(name).or_default().insert(conn);
    }

    pub fn is_member(&self, conn: ConnectionId, room: &RoomAddress) -> bool {
        self.rooms
            .get(&room.room_name())
            .map(|members| members.contains(&conn))
            .unwrap_or(false)
    }

    /// Remove a connection from the registry and every room it joined.
    /// Returns the user it belonged to.
    pub fn unregister(&self, conn: ConnectionId) -> Option<String> {
        let (_, connection) = self.connections.remove(&conn)?;

        for name in &connection.rooms {
            if let Some(mut members) = self.rooms.get_mut(name) {
                members.remove(&conn);
            }
            self.rooms.remove_if(name, |_, members| members.is_empty());
        }

        tracing::info!("Connection unregistered: user={}, conn={}", connection.user_id, conn);
        Some(connection.user_id)
    }

    fn members(&self, room: &RoomAddress) -> Vec<ConnectionId> {
        self.rooms
            .get(&room.room_name())
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Send to every connection in the room
    pub fn emit(&self, room: &RoomAddress, message: WsServerMessage) {
        for conn in self.members(room) {
            self.send_to(conn, message.clone());
        }
    }

    /// Send once to every connection in any of the rooms
    pub fn emit_many(&self, rooms: &[RoomAddress], message: WsServerMessage) {
        let mut targets = HashSet::new();
        for room in rooms {
            targets.extend(self.members(room));
        }
        for conn in targets {
            self.send_to(conn, message.clone());
        }
    }

    /// Send to every connection in the room other than `exclude`
    pub fn emit_except(&self, room: &RoomAddress, exclude: ConnectionId, message: WsServerMessage) {
        for conn in self.members(room) {
            if conn != exclude {
                self.send_to(conn, message.clone());
            }
        }
    }

    /// Send message to a specific connection
    pub fn send_to(&self, conn: ConnectionId, message: WsServerMessage) {
        if let Some(connection) = self.connections.get(&conn) {
            if let Err(e) = connection.sender.send(message) {
                tracing::warn!("Failed to send to connection {}: {}", conn, e);
            }
        }
    }

    /// Send to every connection not belonging to `user_id`
    pub fn broadcast_except_user(&self, user_id: &str, message: WsServerMessage) {
        let targets: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|entry| entry.value().user_id != user_id)
            .map(|entry| *entry.key())
            .collect();

        for conn in targets {
            self.send_to(conn, message.clone());
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PresenceChange;
    use uuid::Uuid;

    fn pong() -> WsServerMessage {
        WsServerMessage::Pong
    }

    #[test]
    fn test_room_names() {
        assert_eq!(RoomAddress::Individual("u1".into()).room_name(), "user-u1");
        assert_eq!(RoomAddress::Event("e1".into()).room_name(), "event-e1");
        assert_eq!(RoomAddress::Admin.room_name(), "admin");
        assert_eq!(
            RoomAddress::from(&ChatTarget::Event("e1".into())),
            RoomAddress::Event("e1".into())
        );
    }

    #[test]
    fn test_connection_management() {
        let gateway = Gateway::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Uuid::new_v4();

        gateway.register(conn, "user1", tx);
        assert!(gateway.is_member(conn, &RoomAddress::Individual("user1".into())));

        gateway.join(conn, &RoomAddress::Event("evt".into()));
        gateway.emit(&RoomAddress::Event("evt".into()), pong());
        assert_eq!(rx.try_recv().unwrap(), WsServerMessage::Pong);

        assert_eq!(gateway.unregister(conn).as_deref(), Some("user1"));
        assert!(!gateway.is_member(conn, &RoomAddress::Event("evt".into())));
        assert_eq!(gateway.connection_count(), 0);
        assert!(gateway.unregister(conn).is_none());
    }

    #[test]
    fn test_emit_many_delivers_once_per_connection() {
        let gateway = Gateway::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Uuid::new_v4();
        gateway.register(conn, "alice", tx);
        gateway.join(conn, &RoomAddress::Event("evt".into()));

        gateway.emit_many(
            &[RoomAddress::Individual("alice".into()), RoomAddress::Event("evt".into())],
            pong(),
        );

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_exclusions() {
        let gateway = Gateway::new();
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        gateway.register(a, "alice", a_tx);
        gateway.register(b, "bob", b_tx);
        gateway.join(a, &RoomAddress::Event("evt".into()));
        gateway.join(b, &RoomAddress::Event("evt".into()));

        gateway.emit_except(&RoomAddress::Event("evt".into()), a, pong());
        assert!(a_rx.try_recv().is_err());
        assert!(b_rx.try_recv().is_ok());

        let online = WsServerMessage::UserOnline(PresenceChange { user_id: "alice".into(), last_seen: None });
        gateway.broadcast_except_user("alice", online.clone());
        assert!(a_rx.try_recv().is_err());
        assert_eq!(b_rx.try_recv().unwrap(), online);
    }
}
