//! Main orchestration logic for verifying a session.

use crate::checkpoint::CheckpointStore;
use crate::checksum::{classify_fingerprint, strip_quotes, ChecksumEngine, FingerprintShape};
use crate::error::VerifyError;
use crate::observer::VerificationObserver;
use crate::remote::FingerprintSource;
use crate::session::VerificationSession;
use crate::types::{
    FileRecord, FileState, VerificationOutcome, VerificationTarget, NOT_RECALCULATED,
};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Counts for one call to [`VerificationOrchestrator::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub verified: usize,
    pub failed: usize,
    /// Files still queued when the run ended.
    pub remaining: usize,
    /// The run ended because the stop flag was raised.
    pub stopped: bool,
}

/// Drains a session's queue, one file at a time.
pub struct VerificationOrchestrator<S> {
    source: S,
    engine: ChecksumEngine,
    checkpoints: CheckpointStore,
    stop: Option<Arc<AtomicBool>>,
}

impl<S: FingerprintSource> VerificationOrchestrator<S> {
    pub fn new(source: S, engine: ChecksumEngine, checkpoints: CheckpointStore) -> Self {
        Self {
            source,
            engine,
            checkpoints,
            stop: None,
        }
    }

    /// Stops the run before the next file once `flag` is set.
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop = Some(flag);
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Verifies every queued file.
    ///
    /// Per-file failures (missing objects, unreadable files, unresolvable
    /// part sizes) are recorded on the file and never end the run. The session
    /// is checkpointed after each verified file and once more at the end.
    ///
    /// # Errors
    ///
    /// Only [`VerifyError::QueueInvariantViolation`], when the session reports
    /// queued work it cannot hand out.
    pub async fn run(
        &self,
        session: &mut VerificationSession,
        observer: &mut dyn VerificationObserver,
    ) -> Result<RunSummary, VerifyError> {
        session.begin_run();
        observer.run_started(session);
        let mut summary = RunSummary::default();

        while session.has_next() {
            if self.stop_requested() {
                info!("Stop requested, ending run before the next file");
                summary.stopped = true;
                break;
            }

            let record = session.peek_next().cloned().ok_or_else(|| {
                VerifyError::QueueInvariantViolation(format!(
                    "{} files queued but none returned",
                    session.tally(FileState::Queued).files
                ))
            })?;

            let started = Instant::now();
            observer.file_started(&record);

            let mut outcome = VerificationOutcome::default();
            if let Err(e) = self.verify_file(session.target(), &record, &mut outcome).await {
                debug!("Verification of {} errored: {}", record.path, e);
                outcome.verified = None;
                outcome.comment = e.to_string();
            }
            let elapsed = started.elapsed();
            let verified = outcome.verified == Some(true);
            let comment = outcome.comment.clone();

            session
                .record_outcome(&record.path, outcome)
                .and_then(|_| {
                    if verified {
                        session.mark_completed(&record.path, elapsed)
                    } else {
                        session.mark_failed(&record.path, elapsed, comment)
                    }
                })
                .map_err(|e| VerifyError::QueueInvariantViolation(e.to_string()))?;

            if let Some(finished) = session.get(&record.path) {
                observer.file_finished(finished, session);
            }

            if verified {
                summary.verified += 1;
                self.checkpoint(session, observer);
            } else {
                summary.failed += 1;
            }
        }

        session.end_run();
        self.checkpoint(session, observer);
        summary.remaining = session.tally(FileState::Queued).files;
        observer.run_finished(session, &summary);
        Ok(summary)
    }

    fn stop_requested(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn checkpoint(&self, session: &mut VerificationSession, observer: &mut dyn VerificationObserver) {
        session.touch();
        match self.checkpoints.save(session) {
            Ok(path) => observer.checkpoint_written(&path),
            Err(e) => observer.checkpoint_failed(&e),
        }
    }

    /// Fills `outcome` for one file. Fields set before an error stay set.
    async fn verify_file(
        &self,
        target: &VerificationTarget,
        record: &FileRecord,
        outcome: &mut VerificationOutcome,
    ) -> Result<(), VerifyError> {
        let key = target.remote_key(&record.path);
        let remote = self.source.fingerprint(&target.bucket, &key).await?;
        let remote = strip_quotes(&remote).to_string();
        let shape = classify_fingerprint(&remote);
        outcome.remote_fingerprint = Some(remote.clone());
        outcome.fingerprint_kind = Some(shape.kind());

        let reference = match shape {
            FingerprintShape::Simple => record.reference_digest.as_deref(),
            FingerprintShape::Chunked { .. } => record.reference_chunked_digest.as_deref(),
        };
        if let Some(reference) = reference {
            outcome.computed_fingerprint = Some(NOT_RECALCULATED.to_string());
            let matched = strip_quotes(reference).eq_ignore_ascii_case(&remote);
            outcome.verified = Some(matched);
            if !matched {
                outcome.comment = format!(
                    "The remote ETag did not match the reference {}",
                    match shape {
                        FingerprintShape::Simple => "MD5 checksum",
                        FingerprintShape::Chunked { .. } => "ETag",
                    }
                );
            }
            return Ok(());
        }

        let computed = self
            .compute_locally(target.local_path(&record.path), record.size_bytes, shape)
            .await?;
        let matched = computed.eq_ignore_ascii_case(&remote);
        outcome.verified = Some(matched);
        outcome.computed_fingerprint = Some(computed);
        if !matched {
            outcome.comment = "The calculated ETag did not match the remote ETag".to_string();
        }
        Ok(())
    }

    /// Hashes a local file on the blocking pool.
    async fn compute_locally(
        &self,
        path: PathBuf,
        expected_size: u64,
        shape: FingerprintShape,
    ) -> Result<String, VerifyError> {
        let engine = self.engine.clone();

        tokio::task::spawn_blocking(move || {
            let actual_size = std::fs::metadata(&path)?.len();
            if actual_size != expected_size {
                return Err(VerifyError::IoError(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "File size mismatch for {}: expected {} bytes, found {} bytes",
                        path.display(),
                        expected_size,
                        actual_size
                    ),
                )));
            }
            match shape {
                FingerprintShape::Simple => engine.whole_file_digest(&path),
                FingerprintShape::Chunked { parts } => engine.chunked_digest(&path, parts),
            }
        })
        .await
        .map_err(|e| VerifyError::IoError(io::Error::other(format!("Task join error: {}", e))))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::PartSizeCandidates;
    use crate::observer::TracingObserver;
    use crate::remote::MemoryFingerprintSource;
    use md5::{Digest, Md5};

    const HELLO_MD5: &str = "5eb63bbbe01eeed093cb22bb8f5acdc3";

    struct Fixture {
        _dir: tempfile::TempDir,
        local: PathBuf,
        checkpoints: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let local = dir.path().join("local");
            let checkpoints = dir.path().join("checkpoints");
            std::fs::create_dir_all(&local).unwrap();
            Self {
                _dir: dir,
                local,
                checkpoints,
            }
        }

        fn write(&self, path: &str, data: &[u8]) {
            let full = self.local.join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, data).unwrap();
        }

        fn session(&self) -> VerificationSession {
            VerificationSession::new(VerificationTarget {
                bucket: "bucket".to_string(),
                local_root: Some(self.local.clone()),
                remote_root: Some("remote".to_string()),
            })
        }

        fn orchestrator(
            &self,
            source: MemoryFingerprintSource,
            part_sizes: PartSizeCandidates,
        ) -> VerificationOrchestrator<MemoryFingerprintSource> {
            VerificationOrchestrator::new(
                source,
                ChecksumEngine::new(part_sizes),
                CheckpointStore::new(&self.checkpoints),
            )
        }

        fn checkpoint_files(&self) -> usize {
            std::fs::read_dir(&self.checkpoints).map_or(0, |d| d.count())
        }
    }

    fn store_etag(data: &[u8], part_size: usize) -> String {
        let mut concatenated = Vec::new();
        for chunk in data.chunks(part_size) {
            concatenated.extend_from_slice(&Md5::digest(chunk));
        }
        format!(
            "{:x}-{}",
            Md5::digest(&concatenated),
            data.chunks(part_size).count()
        )
    }

    #[tokio::test]
    async fn test_reference_digest_skips_local_read() {
        let fx = Fixture::new();
        let mut source = MemoryFingerprintSource::new();
        source.insert("bucket", "remote/absent.bin", format!("\"{}\"", HELLO_MD5));
        let mut session = fx.session();
        // No local file exists: a local read would fail the record.
        session
            .enqueue("absent.bin", 11, Some(HELLO_MD5.to_uppercase()), None)
            .unwrap();

        let orchestrator = fx.orchestrator(source, PartSizeCandidates::default());
        let summary = orchestrator.run(&mut session, &mut TracingObserver).await.unwrap();

        assert_eq!(summary.verified, 1);
        let record = session.get("absent.bin").unwrap();
        assert_eq!(record.state, FileState::Completed);
        assert_eq!(record.verified, Some(true));
        assert_eq!(record.computed_fingerprint.as_deref(), Some(NOT_RECALCULATED));
        assert_eq!(record.remote_fingerprint.as_deref(), Some(HELLO_MD5));
        assert!(record.comment.is_empty());
    }

    #[tokio::test]
    async fn test_reference_mismatch_fails() {
        let fx = Fixture::new();
        let mut source = MemoryFingerprintSource::new();
        source.insert("bucket", "remote/a.bin", HELLO_MD5);
        let mut session = fx.session();
        session
            .enqueue("a.bin", 11, Some("00000000000000000000000000000000".into()), None)
            .unwrap();

        let orchestrator = fx.orchestrator(source, PartSizeCandidates::default());
        orchestrator.run(&mut session, &mut TracingObserver).await.unwrap();

        let record = session.get("a.bin").unwrap();
        assert_eq!(record.state, FileState::Failed);
        assert_eq!(record.verified, Some(false));
        assert!(record.comment.contains("reference MD5"));
    }

    #[tokio::test]
    async fn test_simple_etag_recomputed_locally() {
        let fx = Fixture::new();
        fx.write("good.txt", b"hello world");
        fx.write("bad.txt", b"hello there");
        let mut source = MemoryFingerprintSource::new();
        source.insert("bucket", "remote/good.txt", HELLO_MD5);
        source.insert("bucket", "remote/bad.txt", HELLO_MD5);
        let mut session = fx.session();
        session.enqueue("good.txt", 11, None, None).unwrap();
        session.enqueue("bad.txt", 11, None, None).unwrap();

        let orchestrator = fx.orchestrator(source, PartSizeCandidates::default());
        let summary = orchestrator.run(&mut session, &mut TracingObserver).await.unwrap();
        assert_eq!((summary.verified, summary.failed, summary.remaining), (1, 1, 0));

        let good = session.get("good.txt").unwrap();
        assert_eq!(good.computed_fingerprint.as_deref(), Some(HELLO_MD5));
        assert_eq!(good.fingerprint_kind, Some(crate::types::FingerprintKind::Simple));

        let bad = session.get("bad.txt").unwrap();
        assert_eq!(bad.verified, Some(false));
        assert!(!bad.comment.is_empty());
        assert_ne!(bad.computed_fingerprint.as_deref(), Some(HELLO_MD5));
    }

    #[tokio::test]
    async fn test_chunked_etag_recomputed_locally() {
        let fx = Fixture::new();
        let data: Vec<u8> = (0..2_500u32).map(|i| (i % 256) as u8).collect();
        fx.write("dir/multi.bin", &data);
        let mut source = MemoryFingerprintSource::new();
        source.insert("bucket", "remote/dir/multi.bin", store_etag(&data, 1_024));
        let mut session = fx.session();
        session.enqueue("dir/multi.bin", 2_500, None, None).unwrap();

        let orchestrator = fx.orchestrator(source, PartSizeCandidates::new(vec![1_024]));
        let summary = orchestrator.run(&mut session, &mut TracingObserver).await.unwrap();

        assert_eq!(summary.verified, 1);
        let record = session.get("dir/multi.bin").unwrap();
        assert_eq!(record.fingerprint_kind, Some(crate::types::FingerprintKind::Chunked));
        assert_eq!(record.computed_fingerprint, record.remote_fingerprint);
    }

    #[tokio::test]
    async fn test_per_file_errors_do_not_stop_run() {
        let fx = Fixture::new();
        fx.write("tiny.bin", b"abc");
        fx.write("short.txt", b"hello");
        fx.write("ok.txt", b"hello world");
        let mut source = MemoryFingerprintSource::new();
        // Three bytes cannot be three parts under any candidate.
        source.insert("bucket", "remote/tiny.bin", "0123456789abcdef0123456789abcdef-3");
        source.insert("bucket", "remote/short.txt", HELLO_MD5);
        source.insert("bucket", "remote/ok.txt", HELLO_MD5);
        let mut session = fx.session();
        session.enqueue("missing-remote.txt", 1, None, None).unwrap();
        session.enqueue("tiny.bin", 3, None, None).unwrap();
        session.enqueue("short.txt", 11, None, None).unwrap();
        session.enqueue("ok.txt", 11, None, None).unwrap();

        let orchestrator = fx.orchestrator(source, PartSizeCandidates::default());
        let summary = orchestrator.run(&mut session, &mut TracingObserver).await.unwrap();
        assert_eq!((summary.verified, summary.failed), (1, 3));

        let missing = session.get("missing-remote.txt").unwrap();
        assert!(missing.comment.contains("not found"), "{}", missing.comment);
        assert_eq!(missing.remote_fingerprint, None);
        assert_eq!(missing.verified, None);

        let tiny = session.get("tiny.bin").unwrap();
        assert!(tiny.comment.contains("part size"), "{}", tiny.comment);
        assert_eq!(tiny.fingerprint_kind, Some(crate::types::FingerprintKind::Chunked));
        assert_eq!(tiny.verified, None);

        let short = session.get("short.txt").unwrap();
        assert!(short.comment.contains("size mismatch"), "{}", short.comment);
        assert_eq!(session.get("ok.txt").unwrap().state, FileState::Completed);
    }

    #[tokio::test]
    async fn test_checkpoint_allows_resume() {
        let fx = Fixture::new();
        let mut source = MemoryFingerprintSource::new();
        source.insert("bucket", "remote/a", HELLO_MD5);
        source.insert("bucket", "remote/b", HELLO_MD5);
        let mut session = fx.session();
        session.enqueue("a", 11, Some(HELLO_MD5.into()), None).unwrap();
        session.enqueue("b", 11, Some(HELLO_MD5.into()), None).unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let orchestrator =
            fx.orchestrator(source, PartSizeCandidates::default()).with_stop_flag(stop.clone());

        // Stopped before any file: nothing is looked up, one final checkpoint is written.
        stop.store(true, Ordering::SeqCst);
        let summary = orchestrator.run(&mut session, &mut TracingObserver).await.unwrap();
        assert!(summary.stopped);
        assert_eq!(summary.remaining, 2);
        assert_eq!(orchestrator.source().lookups(), 0);
        assert_eq!(fx.checkpoint_files(), 1);

        let saved = CheckpointStore::new(&fx.checkpoints).latest().unwrap().unwrap();
        let mut resumed = CheckpointStore::load(&saved).unwrap();
        assert_eq!(resumed.timing().run_history.len(), 1);

        stop.store(false, Ordering::SeqCst);
        let summary = orchestrator.run(&mut resumed, &mut TracingObserver).await.unwrap();
        assert_eq!(summary.verified, 2);
        assert_eq!(orchestrator.source().lookups(), 2);

        let saved = CheckpointStore::new(&fx.checkpoints).latest().unwrap().unwrap();
        let restored = CheckpointStore::load(&saved).unwrap();
        assert!(!restored.has_next());
        assert_eq!(restored.completed_bytes(), 22);
        assert_eq!(restored.timing().run_history.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_queue_with_pending_count_is_fatal() {
        let fx = Fixture::new();
        let mut session = fx.session();
        session.enqueue("a", 5, None, None).unwrap();
        let mut value = serde_json::to_value(&session).unwrap();
        value["records"] = serde_json::json!([]);
        let mut broken: VerificationSession = serde_json::from_value(value).unwrap();

        let orchestrator = fx.orchestrator(MemoryFingerprintSource::new(), PartSizeCandidates::default());
        let err = orchestrator
            .run(&mut broken, &mut TracingObserver)
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
