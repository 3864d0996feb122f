//! Error types for snapshot persistence.

use std::path::PathBuf;

/// Failures while saving or loading snapshots.
///
/// None of these are fatal to a session: callers log them and try again
/// on the next save.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode snapshot: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode snapshot {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The task that performs saves for a session has stopped.
    #[error("snapshot writer is unavailable")]
    Unavailable,
}
