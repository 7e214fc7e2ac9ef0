//! Error types for verification operations.

use std::io;
use thiserror::Error;

/// Errors returned by a remote fingerprint lookup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The object does not exist in the bucket.
    #[error("Object not found: s3://{bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// The request failed in transit or the store returned an unusable response.
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Errors that can occur during verification operations.
#[derive(Error, Debug)]
pub enum VerifyError {
    /// I/O error during local file operations.
    #[error(transparent)]
    IoError(#[from] io::Error),

    /// Remote ETag lookup failure.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    /// CSV read/write error.
    #[error(transparent)]
    CsvError(#[from] csv::Error),

    /// No candidate part size reproduces the part count for this file size.
    #[error("Could not determine part size for {size} bytes in {parts} parts")]
    PartSizeUnresolved { size: u64, parts: u64 },

    /// The same path was queued twice.
    #[error("Duplicate file path in session: {0}")]
    DuplicatePath(String),

    /// The path is not part of the session.
    #[error("Unknown file path: {0}")]
    UnknownPath(String),

    /// A transition was requested for a record that already left the queue.
    #[error("File is not queued: {0}")]
    NotQueued(String),

    /// The queue reported pending work but yielded no record.
    #[error("Critical error: unable to get file data from queue ({0})")]
    QueueInvariantViolation(String),

    /// A manifest could not be loaded.
    #[error("Invalid manifest: {0}")]
    Manifest(String),

    /// A checkpoint was readable but its contents are inconsistent.
    #[error("Corrupt checkpoint: {0}")]
    CorruptCheckpoint(String),
}

impl VerifyError {
    /// Whether this error must abort the whole run rather than fail a single file.
    pub fn is_fatal(&self) -> bool {
        matches!(self, VerifyError::QueueInvariantViolation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_queue_violation_is_fatal() {
        assert!(VerifyError::QueueInvariantViolation("x".into()).is_fatal());
        assert!(!VerifyError::PartSizeUnresolved { size: 1, parts: 2 }.is_fatal());
        assert!(!VerifyError::from(RemoteError::Transport("reset".into())).is_fatal());
        assert!(!VerifyError::DuplicatePath("a".into()).is_fatal());
    }

    #[test]
    fn test_remote_error_message_names_object() {
        let err = RemoteError::NotFound {
            bucket: "b".into(),
            key: "dir/file.bin".into(),
        };
        assert_eq!(err.to_string(), "Object not found: s3://b/dir/file.bin");
    }
}
