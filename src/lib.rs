//! etagcheck - Verify files transferred to S3-compatible storage against their ETags
//!
//! This library checks that objects in a bucket match the local files they were
//! uploaded from, using the store's ETag as the reference. Plain ETags are
//! compared against a whole-file MD5; multipart ETags (`<hex>-<parts>`) are
//! reproduced by inferring the part size the uploader used.
//!
//! # Features
//!
//! - **Multipart ETags**: Recover the part size from the object size and part count
//! - **Resumable Sessions**: Checkpoint after every verified file and resume later
//! - **Reference Digests**: Skip local hashing when the manifest already holds a digest
//! - **Progress Tracking**: Remaining-time estimates from observed throughput
//! - **Automatic Retry**: Transient ETag lookup failures are retried
//!
//! # Example
//!
//! ```no_run
//! use etagcheck::{
//!     load_manifest, queue_manifest, ChecksumEngine, CheckpointStore, HttpFingerprintSource,
//!     TracingObserver, VerificationOrchestrator, VerificationSession, VerifyConfig,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = VerifyConfig {
//!     bucket: "my-bucket".to_string(),
//!     ..VerifyConfig::default()
//! };
//! let mut session = VerificationSession::new(config.target());
//! queue_manifest(&mut session, load_manifest("manifest.csv".as_ref())?)?;
//!
//! let orchestrator = VerificationOrchestrator::new(
//!     HttpFingerprintSource::new(&config)?,
//!     ChecksumEngine::new(config.part_sizes.clone()),
//!     CheckpointStore::new(&config.checkpoint_dir),
//! );
//! orchestrator.run(&mut session, &mut TracingObserver).await?;
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod checksum;
pub mod error;
pub mod manifest;
pub mod observer;
pub mod orchestrator;
pub mod remote;
pub mod report;
pub mod session;
pub mod types;

pub use checkpoint::CheckpointStore;
pub use checksum::{classify_fingerprint, ChecksumEngine, FingerprintShape, PartSizeCandidates};
pub use error::{RemoteError, VerifyError};
pub use manifest::{generate_manifest, load_manifest, queue_manifest, write_manifest, ManifestRow};
pub use observer::{ProgressObserver, TracingObserver, VerificationObserver};
pub use orchestrator::{RunSummary, VerificationOrchestrator};
pub use remote::{FingerprintSource, HttpFingerprintSource, MemoryFingerprintSource};
pub use report::{CsvReport, ReportSink};
pub use session::VerificationSession;
pub use types::{
    FileRecord, FileState, FingerprintKind, VerificationTarget, VerifyConfig, NOT_RECALCULATED,
};
