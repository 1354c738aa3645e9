//! Version history manager.
//!
//! Wraps the store's bounded per-file version ring with the two operations
//! the protocol exposes: reading the history and reverting live content to a
//! chosen record. Reverting overwrites the file but never pushes a record of
//! the content it replaced, so repeated reverts do not grow history.

use std::sync::Arc;

use crate::storage::{RoomStore, StorageResult, VersionRecord};

/// Outcome of a revert request
#[derive(Debug, Clone, PartialEq)]
pub enum RevertOutcome {
    /// The index was valid; live content now equals `code`
    Applied { code: String },
    /// The index was outside the current history; nothing changed
    OutOfRange,
}

/// Read and revert access to a file's version ring
#[derive(Clone)]
pub struct VersionHistory {
    store: Arc<RoomStore>,
}

impl VersionHistory {
    pub fn new(store: Arc<RoomStore>) -> Self {
        Self { store }
    }

    /// Record the content an update just overwrote. The only producer of
    /// version records.
    pub fn record_overwrite(
        &self,
        room_id: &str,
        file: &str,
        prior_content: String,
    ) -> StorageResult<()> {
        self.store
            .push_version(room_id, file, &VersionRecord::new(prior_content))
    }

    /// The full bounded history for a file, newest-first. Read-only.
    pub fn versions(&self, room_id: &str, file: &str) -> StorageResult<Vec<VersionRecord>> {
        self.store.versions(room_id, file)
    }

    /// Revert live content to the record at `index` (zero-based, newest
    /// first). An out-of-range index changes nothing.
    pub fn revert(&self, room_id: &str, file: &str, index: usize) -> StorageResult<RevertOutcome> {
        let versions = self.store.versions(room_id, file)?;
        let Some(record) = versions.get(index) else {
            return Ok(RevertOutcome::OutOfRange);
        };
        self.store.set_file_content(room_id, file, &record.code)?;
        Ok(RevertOutcome::Applied {
            code: record.code.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{StorageConfig, VERSION_LIMIT};
    use tempfile::tempdir;

    fn test_history() -> (tempfile::TempDir, Arc<RoomStore>, VersionHistory) {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path().join("test.sled").to_string_lossy().to_string());
        let store = Arc::new(RoomStore::open(config).unwrap());
        let history = VersionHistory::new(store.clone());
        (dir, store, history)
    }

    #[test]
    fn test_record_overwrite_newest_first() {
        let (_dir, _store, history) = test_history();

        history
            .record_overwrite("r1", "main.js", "first".into())
            .unwrap();
        history
            .record_overwrite("r1", "main.js", "second".into())
            .unwrap();

        let versions = history.versions("r1", "main.js").unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].code, "second");
        assert_eq!(versions[1].code, "first");
    }

    #[test]
    fn test_history_bounded() {
        let (_dir, _store, history) = test_history();

        for i in 0..25 {
            history
                .record_overwrite("r1", "main.js", format!("v{}", i))
                .unwrap();
        }

        let versions = history.versions("r1", "main.js").unwrap();
        assert_eq!(versions.len(), VERSION_LIMIT);
        assert_eq!(versions[0].code, "v24");
    }

    #[test]
    fn test_revert_sets_content_without_new_record() {
        let (_dir, store, history) = test_history();

        store.set_file_content("r1", "main.js", "current").unwrap();
        history
            .record_overwrite("r1", "main.js", "older".into())
            .unwrap();

        let outcome = history.revert("r1", "main.js", 0).unwrap();
        assert_eq!(
            outcome,
            RevertOutcome::Applied {
                code: "older".into()
            }
        );
        assert_eq!(
            store.file_content("r1", "main.js").unwrap().as_deref(),
            Some("older")
        );

        // "current" is gone from history: revert pushed nothing
        let versions = history.versions("r1", "main.js").unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].code, "older");
    }

    #[test]
    fn test_revert_out_of_range_is_noop() {
        let (_dir, store, history) = test_history();

        store.set_file_content("r1", "main.js", "current").unwrap();
        history
            .record_overwrite("r1", "main.js", "older".into())
            .unwrap();

        let outcome = history.revert("r1", "main.js", 5).unwrap();
        assert_eq!(outcome, RevertOutcome::OutOfRange);
        assert_eq!(
            store.file_content("r1", "main.js").unwrap().as_deref(),
            Some("current")
        );
    }

    #[test]
    fn test_revert_empty_history_is_out_of_range() {
        let (_dir, _store, history) = test_history();
        let outcome = history.revert("r1", "main.js", 0).unwrap();
        assert_eq!(outcome, RevertOutcome::OutOfRange);
    }
}
