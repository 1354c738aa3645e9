//! Wire protocol: tagged JSON messages over one WebSocket per connection.
//!
//! Every frame after the credential frame is a JSON object tagged by `type`.
//! Client messages are the inbound vocabulary; server messages are what a
//! session receives. Mutating kinds are echoed to the whole room, sender
//! included; `init`, `versions` and `error` go to a single recipient only.
//! Parsing is strict per kind: a missing required field is a malformed
//! message, answered with `error` instead of an unhandled fault.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::storage::{CursorPosition, VersionRecord};

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Overwrite a file, recording the prior content as a version
    CodeUpdate { file: String, code: String },

    /// Report the sender's latest cursor position
    CursorUpdate { position: CursorPosition },

    /// Create a file with placeholder content
    NewFile { file: String },

    /// Move a file's content and version history to a new name
    RenameFile { old_name: String, new_name: String },

    /// Remove a file's content and version history
    DeleteFile { file: String },

    /// Ask for a file's version history (reply-only, no broadcast)
    GetVersions { file: String },

    /// Restore a file to the version at `index` (zero-based, newest first)
    RevertVersion { file: String, index: usize },
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Snapshot of every file in the room, sent once after a successful join
    Init { files: BTreeMap<String, String> },

    /// A file was overwritten
    CodeUpdate { file: String, code: String },

    /// A participant moved their cursor
    CursorUpdate { position: CursorPosition },

    /// A file was created
    NewFile { file: String },

    /// A file was renamed
    RenameFile { old_name: String, new_name: String },

    /// A file was deleted
    DeleteFile { file: String },

    /// Reply to `get_versions`: the bounded history, newest-first
    Versions {
        file: String,
        versions: Vec<VersionRecord>,
    },

    /// Echo of a revert request. `code` carries the restored content when the
    /// index was valid; an out-of-range revert is echoed without it.
    RevertVersion {
        file: String,
        index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    /// A participant disconnected
    UserLeft { client_id: String },

    /// Requester-only failure report
    Error { message: String },
}
