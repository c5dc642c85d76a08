//! Sync error types.

use std::path::PathBuf;

/// Errors produced by a sync run.
///
/// `RemoteList` and `Configuration` abort the whole run. `Io` and
/// `RemoteUpload` only fail the file they belong to and are collected in
/// [`SyncStats::failures`](crate::SyncStats).
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to list objects in bucket {bucket}: {message}")]
    RemoteList { bucket: String, message: String },

    #[error("failed to upload {key}: {message}")]
    RemoteUpload { key: String, message: String },

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl SyncError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error must stop the run before (or instead of) any upload.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::RemoteList { .. } | SyncError::Configuration(_)
        )
    }
}
