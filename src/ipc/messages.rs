//! Control socket message types

use serde::{Deserialize, Serialize};

use crate::config::SyncConfig;
use crate::status::StatusSnapshot;

/// Requests sent by a UI or script to the running daemon
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum ControlRequest {
    /// Health check
    Ping,

    /// Current pipeline and link status
    GetStatus,

    /// The document currently in effect
    GetConfig,

    /// Validate, write to disk and adopt a new document
    SaveConfig(SyncConfig),

    /// Re-read the document from disk now
    ReloadConfig,
}

/// Responses sent back by the daemon
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum ControlResponse {
    /// Health check response
    Pong,

    Status(StatusSnapshot),

    Config(SyncConfig),

    /// The document was accepted and written
    Saved,

    /// Reload finished; `changed` is false when the file content was identical
    Reloaded { changed: bool },

    /// Error occurred
    Error(String),
}
