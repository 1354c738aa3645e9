//! Room module for in-memory membership tracking.
//!
//! A room here is nothing but its live members: the mapping from participant
//! identity to connection handle. File content, version history and cursors
//! live in `crate::storage` and survive the room's in-memory entry.

mod registry;

pub use registry::{Departure, RoomRegistry, SessionHandle};

/// Unique identifier for a room
pub type RoomId = String;

/// Unique identifier for a participant
pub type ClientId = String;
