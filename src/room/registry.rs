//! In-memory registry of live sessions, keyed room → identity → handle.
//!
//! Rooms exist implicitly: the entry appears on first registration and is
//! removed when the last member deregisters. Exclusion is scoped to a single
//! room's entry and is never held across a store call or a send, so
//! deregistration during a broadcast cannot corrupt either.

use dashmap::DashMap;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::debug;

use super::{ClientId, RoomId};
use crate::session::protocol::ServerMessage;

/// Channel handle through which a session receives outbound messages. The
/// socket itself stays with the connection task; the registry only refers.
pub type SessionHandle = mpsc::UnboundedSender<ServerMessage>;

/// Outcome of a deregistration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// The session was removed; other members remain
    Left,
    /// The session was removed and the room's entry went with it
    LeftAndEmptied,
    /// Unknown room, unknown member, or a displaced handle: nothing changed
    NotRegistered,
}

/// Registry of live sessions across all rooms
#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<RoomId, HashMap<ClientId, SessionHandle>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    /// Make sure a room entry exists
    pub fn ensure_room(&self, room_id: &str) {
        self.rooms.entry(room_id.to_string()).or_default();
    }

    /// Register a session, displacing any prior handle for the same identity.
    /// Returns the displaced handle; the connection behind it is orphaned and
    /// simply stops receiving.
    pub fn register(
        &self,
        room_id: &str,
        client_id: &str,
        handle: SessionHandle,
    ) -> Option<SessionHandle> {
        let displaced = self
            .rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(client_id.to_string(), handle);
        if displaced.is_some() {
            debug!("Displaced prior session for {} in room {}", client_id, room_id);
        }
        displaced
    }

    /// Remove a session from a room; the room entry goes with the last
    /// member. Unknown room or member is a no-op, and so is a teardown from a
    /// displaced connection: the entry is only removed while `handle` is
    /// still the registered channel.
    pub fn deregister(&self, room_id: &str, client_id: &str, handle: &SessionHandle) -> Departure {
        let became_empty = match self.rooms.get_mut(room_id) {
            Some(mut members) => {
                let is_current = members
                    .get(client_id)
                    .is_some_and(|current| current.same_channel(handle));
                if !is_current {
                    return Departure::NotRegistered;
                }
                members.remove(client_id);
                members.is_empty()
            }
            None => return Departure::NotRegistered,
        };
        if became_empty {
            // remove_if re-checks emptiness, so a join that raced in between
            // keeps its room
            self.rooms.remove_if(room_id, |_, members| members.is_empty());
            Departure::LeftAndEmptied
        } else {
            Departure::Left
        }
    }

    /// Snapshot of every live handle in a room, for broadcast. Empty when the
    /// room is unknown.
    pub fn handles(&self, room_id: &str) -> Vec<SessionHandle> {
        self.rooms
            .get(room_id)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Identities currently registered in a room
    pub fn members(&self, room_id: &str) -> Vec<ClientId> {
        self.rooms
            .get(room_id)
            .map(|members| members.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Check if a room has an in-memory entry
    pub fn room_exists(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Number of rooms with at least one registered session
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Total number of registered sessions across rooms
    pub fn session_count(&self) -> usize {
        self.rooms.iter().map(|entry| entry.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (SessionHandle, mpsc::UnboundedReceiver<ServerMessage>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn test_register_and_enumerate() {
        let registry = RoomRegistry::new();
        let (tx_a, _rx_a) = handle();
        let (tx_b, _rx_b) = handle();

        registry.register("r1", "alice", tx_a);
        registry.register("r1", "bob", tx_b);

        assert!(registry.room_exists("r1"));
        assert_eq!(registry.handles("r1").len(), 2);
        let mut members = registry.members("r1");
        members.sort();
        assert_eq!(members, vec!["alice".to_string(), "bob".to_string()]);
        assert_eq!(registry.session_count(), 2);
    }

    #[test]
    fn test_register_same_identity_displaces() {
        let registry = RoomRegistry::new();
        let (tx1, _rx1) = handle();
        let (tx2, _rx2) = handle();

        assert!(registry.register("r1", "alice", tx1).is_none());
        let displaced = registry.register("r1", "alice", tx2);

        assert!(displaced.is_some());
        assert_eq!(registry.handles("r1").len(), 1);
    }

    #[test]
    fn test_deregister_last_member_removes_room() {
        let registry = RoomRegistry::new();
        let (tx, _rx) = handle();

        registry.register("r1", "alice", tx.clone());
        let departure = registry.deregister("r1", "alice", &tx);

        assert_eq!(departure, Departure::LeftAndEmptied);
        assert!(!registry.room_exists("r1"));
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn test_deregister_non_last_keeps_room() {
        let registry = RoomRegistry::new();
        let (tx_a, _rx_a) = handle();
        let (tx_b, _rx_b) = handle();

        registry.register("r1", "alice", tx_a.clone());
        registry.register("r1", "bob", tx_b);

        assert_eq!(registry.deregister("r1", "alice", &tx_a), Departure::Left);
        assert!(registry.room_exists("r1"));
        assert_eq!(registry.members("r1"), vec!["bob".to_string()]);
    }

    #[test]
    fn test_deregister_unknown_is_noop() {
        let registry = RoomRegistry::new();
        let (tx, _rx) = handle();

        assert_eq!(
            registry.deregister("ghost", "alice", &tx),
            Departure::NotRegistered
        );

        registry.register("r1", "bob", tx.clone());
        assert_eq!(
            registry.deregister("r1", "alice", &tx),
            Departure::NotRegistered
        );
        assert!(registry.room_exists("r1"));
    }

    #[test]
    fn test_deregister_from_displaced_handle_is_noop() {
        let registry = RoomRegistry::new();
        let (old_tx, _old_rx) = handle();
        let (new_tx, _new_rx) = handle();

        registry.register("r1", "alice", old_tx.clone());
        registry.register("r1", "alice", new_tx.clone());

        // The orphaned connection tearing down must not evict the live one
        assert_eq!(
            registry.deregister("r1", "alice", &old_tx),
            Departure::NotRegistered
        );
        assert_eq!(registry.members("r1"), vec!["alice".to_string()]);

        assert_eq!(
            registry.deregister("r1", "alice", &new_tx),
            Departure::LeftAndEmptied
        );
        assert!(!registry.room_exists("r1"));
    }

    #[test]
    fn test_handles_snapshot_of_unknown_room_is_empty() {
        let registry = RoomRegistry::new();
        assert!(registry.handles("ghost").is_empty());
        assert!(registry.members("ghost").is_empty());
    }

    #[test]
    fn test_ensure_room_is_idempotent() {
        let registry = RoomRegistry::new();
        registry.ensure_room("r1");
        registry.ensure_room("r1");
        assert!(registry.room_exists("r1"));
        assert_eq!(registry.room_count(), 1);
    }
}
