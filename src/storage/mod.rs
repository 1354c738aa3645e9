//! Storage module for persistent room state using Sled.
//!
//! This module provides the embedded database layer behind a room: file
//! content blobs, the bounded per-file version history, and latest-wins
//! cursor positions. In-memory room membership lives in `crate::room`; the
//! data here deliberately outlives it, so a room's files are resurrected on
//! the next join after everyone has left.

mod sled_store;

pub use sled_store::{RoomStore, StorageError, StorageResult};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of version records retained per file. Older records are
/// silently discarded on push.
pub const VERSION_LIMIT: usize = 10;

/// A snapshot of a file's prior content, captured when an update overwrote it.
///
/// Records are kept newest-first. Only content-overwriting updates produce
/// records; reads and reverts never do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// The content that was overwritten
    pub code: String,
    /// When the overwrite happened
    pub timestamp: DateTime<Utc>,
}

impl VersionRecord {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Latest-wins cursor position for one participant in one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPosition {
    /// Line number (1-based)
    pub line: u32,
    /// Column number (1-based)
    pub column: u32,
}

/// Configuration for the storage layer
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Path to the Sled database directory
    pub path: String,
    /// Cache size in bytes
    pub cache_size: u64,
    /// Flush interval in milliseconds (0 = immediate)
    pub flush_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "./data/coderoom.sled".to_string(),
            cache_size: 128 * 1024 * 1024,
            flush_interval_ms: 500,
        }
    }
}

impl StorageConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_cache_size(mut self, size: u64) -> Self {
        self.cache_size = size;
        self
    }
}
