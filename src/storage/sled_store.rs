//! Sled-based versioned store adapter.
//!
//! One tree per keyspace: file content, version history, cursor positions.
//! Keys are `{room}:{name}` inside each tree, so a room's entries are one
//! prefix scan away. Every public operation is a single atomic step against
//! the database; rename and delete touch the content and history trees inside
//! one multi-tree transaction so a file can never end up renamed without its
//! history.

use sled::transaction::TransactionError;
use sled::{Db, IVec, Transactional, Tree};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use super::{CursorPosition, StorageConfig, VersionRecord, VERSION_LIMIT};

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Sled database error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Corruption detected in key {0}")]
    Corruption(String),

    #[error("Storage transaction aborted")]
    TransactionAborted,

    #[error("Storage initialization failed: {0}")]
    InitFailed(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Tree names for different data types
const TREE_FILES: &str = "files";
const TREE_VERSIONS: &str = "versions";
const TREE_CURSORS: &str = "cursors";

/// Sled-backed store for room files, version history and cursors
#[derive(Clone)]
pub struct RoomStore {
    db: Arc<Db>,
    files: Tree,
    versions: Tree,
    cursors: Tree,
}

impl RoomStore {
    /// Open or create a store at the configured path
    pub fn open(config: StorageConfig) -> StorageResult<Self> {
        let path = Path::new(&config.path);

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::InitFailed(format!("Failed to create directory: {}", e))
            })?;
        }

        let db = sled::Config::new()
            .path(&config.path)
            .cache_capacity(config.cache_size)
            .flush_every_ms(if config.flush_interval_ms > 0 {
                Some(config.flush_interval_ms)
            } else {
                None
            })
            .open()?;

        let files = db.open_tree(TREE_FILES)?;
        let versions = db.open_tree(TREE_VERSIONS)?;
        let cursors = db.open_tree(TREE_CURSORS)?;

        Ok(Self {
            db: Arc::new(db),
            files,
            versions,
            cursors,
        })
    }

    /// Open with default configuration
    pub fn open_default() -> StorageResult<Self> {
        Self::open(StorageConfig::default())
    }

    fn key(room_id: &str, name: &str) -> String {
        format!("{}:{}", room_id, name)
    }

    /// Read a file's current content
    pub fn file_content(&self, room_id: &str, file: &str) -> StorageResult<Option<String>> {
        let key = Self::key(room_id, file);
        match self.files.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(decode_utf8(&key, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Overwrite a file's content
    pub fn set_file_content(&self, room_id: &str, file: &str, content: &str) -> StorageResult<()> {
        self.files
            .insert(Self::key(room_id, file).as_bytes(), content.as_bytes())?;
        Ok(())
    }

    /// Check whether a file exists
    pub fn file_exists(&self, room_id: &str, file: &str) -> StorageResult<bool> {
        Ok(self
            .files
            .contains_key(Self::key(room_id, file).as_bytes())?)
    }

    /// Create a file only if it does not exist yet. Returns whether this call
    /// created it; under concurrent callers exactly one wins.
    pub fn create_file_if_absent(
        &self,
        room_id: &str,
        file: &str,
        content: &str,
    ) -> StorageResult<bool> {
        let created = self
            .files
            .compare_and_swap(
                Self::key(room_id, file).as_bytes(),
                None as Option<&[u8]>,
                Some(content.as_bytes()),
            )?
            .is_ok();
        Ok(created)
    }

    /// Check whether the room has any files at all
    pub fn room_has_files(&self, room_id: &str) -> StorageResult<bool> {
        let prefix = format!("{}:", room_id);
        match self.files.scan_prefix(prefix.as_bytes()).next() {
            Some(item) => {
                item?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Enumerate all files in a room with their content, name-ordered
    pub fn list_files(&self, room_id: &str) -> StorageResult<BTreeMap<String, String>> {
        let prefix = format!("{}:", room_id);
        let mut files = BTreeMap::new();
        for item in self.files.scan_prefix(prefix.as_bytes()) {
            let (key, value) = item?;
            let key_str = String::from_utf8_lossy(&key);
            let name = key_str
                .strip_prefix(&prefix)
                .unwrap_or(&key_str)
                .to_string();
            files.insert(name, decode_utf8(&key_str, &value)?);
        }
        Ok(files)
    }

    /// Push a version record to the front of a file's history and trim it to
    /// the last [`VERSION_LIMIT`] records. The push and trim are one atomic
    /// step (compare-and-swap loop), so concurrent pushes never lose records.
    pub fn push_version(
        &self,
        room_id: &str,
        file: &str,
        record: &VersionRecord,
    ) -> StorageResult<()> {
        let key = Self::key(room_id, file);
        loop {
            let old = self.versions.get(key.as_bytes())?;
            let mut records = decode_versions(&key, old.as_ref())?;
            records.insert(0, record.clone());
            records.truncate(VERSION_LIMIT);
            let new = bincode::serialize(&records)?;
            let swap = self
                .versions
                .compare_and_swap(key.as_bytes(), old.as_ref(), Some(new))?;
            if swap.is_ok() {
                return Ok(());
            }
        }
    }

    /// Read a file's full version history, newest-first
    pub fn versions(&self, room_id: &str, file: &str) -> StorageResult<Vec<VersionRecord>> {
        let key = Self::key(room_id, file);
        let raw = self.versions.get(key.as_bytes())?;
        decode_versions(&key, raw.as_ref())
    }

    /// Rename a file's content key and its version-history key. Both moves
    /// happen in one transaction. Returns whether the old name existed;
    /// nothing changes when it did not.
    pub fn rename_file(&self, room_id: &str, old_name: &str, new_name: &str) -> StorageResult<bool> {
        let old_key = Self::key(room_id, old_name);
        let new_key = Self::key(room_id, new_name);

        (&self.files, &self.versions)
            .transaction(|(files, versions)| {
                match files.remove(old_key.as_bytes())? {
                    Some(content) => {
                        files.insert(new_key.as_bytes(), content)?;
                        if let Some(history) = versions.remove(old_key.as_bytes())? {
                            versions.insert(new_key.as_bytes(), history)?;
                        }
                        Ok(true)
                    }
                    None => Ok(false),
                }
            })
            .map_err(map_transaction_error)
    }

    /// Delete a file's content key and its version-history key in one
    /// transaction. Deleting a missing file is a no-op.
    pub fn delete_file(&self, room_id: &str, file: &str) -> StorageResult<()> {
        let key = Self::key(room_id, file);

        (&self.files, &self.versions)
            .transaction(|(files, versions)| {
                files.remove(key.as_bytes())?;
                versions.remove(key.as_bytes())?;
                Ok(())
            })
            .map_err(map_transaction_error)
    }

    /// Store the latest cursor position for a participant (latest-wins)
    pub fn set_cursor(
        &self,
        room_id: &str,
        client_id: &str,
        position: &CursorPosition,
    ) -> StorageResult<()> {
        let bytes = bincode::serialize(position)?;
        self.cursors
            .insert(Self::key(room_id, client_id).as_bytes(), bytes)?;
        Ok(())
    }

    /// Read a participant's latest cursor position
    pub fn cursor(&self, room_id: &str, client_id: &str) -> StorageResult<Option<CursorPosition>> {
        match self
            .cursors
            .get(Self::key(room_id, client_id).as_bytes())?
        {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Force flush all pending writes to disk
    pub fn flush(&self) -> StorageResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl Drop for RoomStore {
    fn drop(&mut self) {
        // Attempt to flush on drop, but don't panic
        let _ = self.flush();
    }
}

fn decode_utf8(key: &str, bytes: &IVec) -> StorageResult<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| StorageError::Corruption(key.to_string()))
}

fn decode_versions(key: &str, raw: Option<&IVec>) -> StorageResult<Vec<VersionRecord>> {
    match raw {
        Some(bytes) => {
            bincode::deserialize(bytes).map_err(|_| StorageError::Corruption(key.to_string()))
        }
        None => Ok(Vec::new()),
    }
}

fn map_transaction_error(err: TransactionError<()>) -> StorageError {
    match err {
        TransactionError::Storage(e) => StorageError::Sled(e),
        TransactionError::Abort(()) => StorageError::TransactionAborted,
    }
}
