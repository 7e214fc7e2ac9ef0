//! Data structures for verification operations.

use crate::checksum::PartSizeCandidates;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Value stored as the computed fingerprint when a reference digest satisfied the check.
pub const NOT_RECALCULATED: &str = "Not Recalculated";

/// Configuration for a verification run.
///
/// # Example
///
/// ```
/// use etagcheck::VerifyConfig;
///
/// let config = VerifyConfig {
///     bucket: "my-bucket".to_string(),
///     remote_root: Some("transfers/2024".to_string()),
///     ..VerifyConfig::default()
/// };
/// assert_eq!(config.remote_key("a/b.bin"), "transfers/2024/a/b.bin");
/// ```
#[derive(Debug, Clone)]
pub struct VerifyConfig {
    /// Base URL of the S3-compatible store, path-style (e.g., `<https://s3.amazonaws.com>`)
    pub endpoint: String,
    /// Bucket holding the transferred objects.
    pub bucket: String,
    /// Folder the manifest paths are relative to on the local side.
    pub local_root: Option<PathBuf>,
    /// Key prefix the manifest paths are relative to on the remote side.
    pub remote_root: Option<String>,
    /// Directory for session checkpoints (created if absent).
    pub checkpoint_dir: PathBuf,
    /// Ordered part sizes tried when reproducing multipart ETags.
    pub part_sizes: PartSizeCandidates,
    /// Timeout for a single HEAD request.
    pub request_timeout: Duration,
    /// Retries for transient lookup failures (not counting the first attempt).
    pub max_retries: usize,
    /// Delay between lookup retries.
    pub retry_interval: Duration,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://s3.amazonaws.com".to_string(),
            bucket: String::new(),
            local_root: None,
            remote_root: None,
            checkpoint_dir: PathBuf::from("tmp"),
            part_sizes: PartSizeCandidates::default(),
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_interval: Duration::from_secs(5),
        }
    }
}

impl VerifyConfig {
    /// Location of the run, as stored in the session.
    pub fn target(&self) -> VerificationTarget {
        VerificationTarget {
            bucket: self.bucket.clone(),
            local_root: self.local_root.clone(),
            remote_root: self.remote_root.clone(),
        }
    }

    /// Object key for a manifest path.
    pub fn remote_key(&self, path: &str) -> String {
        self.target().remote_key(path)
    }
}

/// Where the files of a session live, locally and remotely.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationTarget {
    pub bucket: String,
    pub local_root: Option<PathBuf>,
    pub remote_root: Option<String>,
}

impl VerificationTarget {
    pub fn local_path(&self, path: &str) -> PathBuf {
        match &self.local_root {
            Some(root) => root.join(path),
            None => PathBuf::from(path),
        }
    }

    pub fn remote_key(&self, path: &str) -> String {
        match self.remote_root.as_deref().map(|r| r.trim_end_matches('/')) {
            Some(root) if !root.is_empty() => format!("{}/{}", root, path),
            _ => path.to_string(),
        }
    }
}

/// How a remote ETag was produced.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintKind {
    /// Plain MD5 of the whole object.
    Simple,
    /// MD5 of the concatenated per-part MD5s, suffixed with the part count.
    Chunked,
}

impl fmt::Display for FingerprintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FingerprintKind::Simple => f.write_str("MD5 Checksum"),
            FingerprintKind::Chunked => f.write_str("Double Layered MD5 Checksum"),
        }
    }
}

/// Which of the three session sets a record belongs to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileState {
    Queued,
    Completed,
    Failed,
}

/// One file under verification.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FileRecord {
    /// Relative path; identity key within a session.
    pub path: String,
    pub size_bytes: u64,
    /// Known-good whole-file MD5, if the manifest provided one.
    pub reference_digest: Option<String>,
    /// Known-good multipart ETag, if the manifest provided one.
    pub reference_chunked_digest: Option<String>,
    pub remote_fingerprint: Option<String>,
    pub computed_fingerprint: Option<String>,
    pub fingerprint_kind: Option<FingerprintKind>,
    /// `None` until a comparison has been made.
    pub verified: Option<bool>,
    pub comment: String,
    pub state: FileState,
}

impl FileRecord {
    pub fn new(
        path: impl Into<String>,
        size_bytes: u64,
        reference_digest: Option<String>,
        reference_chunked_digest: Option<String>,
    ) -> Self {
        Self {
            path: path.into(),
            size_bytes,
            reference_digest,
            reference_chunked_digest,
            remote_fingerprint: None,
            computed_fingerprint: None,
            fingerprint_kind: None,
            verified: None,
            comment: String::new(),
            state: FileState::Queued,
        }
    }

    /// Last component of the path.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Result of checking one file, applied to its record before it leaves the queue.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VerificationOutcome {
    pub remote_fingerprint: Option<String>,
    pub computed_fingerprint: Option<String>,
    pub fingerprint_kind: Option<FingerprintKind>,
    /// `None` until a comparison has been made.
    pub verified: Option<bool>,
    pub comment: String,
}
