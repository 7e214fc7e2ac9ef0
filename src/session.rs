//! Verification session state: which files are queued, completed or failed.
//!
//! Records are stored once, in insertion order, each tagged with its
//! [`FileState`]. Moving a file between sets is a single state change made
//! together with the byte and file tallies, so the three sets always
//! partition the files ever queued.

use crate::error::VerifyError;
use crate::types::{FileRecord, FileState, VerificationOutcome, VerificationTarget};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use tracing::info;

/// File count and byte total for one set.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub files: usize,
    pub bytes: u64,
}

impl Tally {
    fn add(&mut self, bytes: u64) {
        self.files += 1;
        self.bytes += bytes;
    }

    fn remove(&mut self, bytes: u64) {
        self.files -= 1;
        self.bytes -= bytes;
    }
}

/// Wall-clock bookkeeping across runs of one session.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SessionTiming {
    pub run_started_at: Option<SystemTime>,
    /// Last time the current run recorded activity; `None` until then.
    pub last_activity_at: Option<SystemTime>,
    /// Time spent on files that verified.
    pub completed_duration: Duration,
    /// Time spent on files that failed.
    pub failed_duration: Duration,
    /// Elapsed time of earlier, interrupted runs.
    pub run_history: Vec<Duration>,
}

/// Persistent state of a verification session.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VerificationSession {
    target: VerificationTarget,
    records: Vec<FileRecord>,
    queued: Tally,
    completed: Tally,
    failed: Tally,
    timing: SessionTiming,
    #[serde(skip)]
    index: HashMap<String, usize>,
    /// Every record before this position has left the queue.
    #[serde(skip)]
    queue_head: usize,
}

impl VerificationSession {
    pub fn new(target: VerificationTarget) -> Self {
        Self {
            target,
            records: Vec::new(),
            queued: Tally::default(),
            completed: Tally::default(),
            failed: Tally::default(),
            timing: SessionTiming::default(),
            index: HashMap::new(),
            queue_head: 0,
        }
    }

    pub fn target(&self) -> &VerificationTarget {
        &self.target
    }

    pub fn timing(&self) -> &SessionTiming {
        &self.timing
    }

    /// Adds a file to the queue.
    pub fn enqueue(
        &mut self,
        path: impl Into<String>,
        size_bytes: u64,
        reference_digest: Option<String>,
        reference_chunked_digest: Option<String>,
    ) -> Result<(), VerifyError> {
        let record = FileRecord::new(path, size_bytes, reference_digest, reference_chunked_digest);
        if self.index.contains_key(&record.path) {
            return Err(VerifyError::DuplicatePath(record.path));
        }
        self.index.insert(record.path.clone(), self.records.len());
        self.queued.add(record.size_bytes);
        self.records.push(record);
        Ok(())
    }

    /// Whether the queue still holds work.
    pub fn has_next(&self) -> bool {
        self.queued.files > 0
    }

    /// The oldest queued record, without removing it.
    pub fn peek_next(&self) -> Option<&FileRecord> {
        self.records[self.queue_head.min(self.records.len())..]
            .iter()
            .find(|r| r.state == FileState::Queued)
    }

    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.index.get(path).map(|&i| &self.records[i])
    }

    /// Stores the result of checking a still-queued file.
    pub fn record_outcome(
        &mut self,
        path: &str,
        outcome: VerificationOutcome,
    ) -> Result<(), VerifyError> {
        let record = self.queued_record_mut(path)?;
        record.remote_fingerprint = outcome.remote_fingerprint;
        record.computed_fingerprint = outcome.computed_fingerprint;
        record.fingerprint_kind = outcome.fingerprint_kind;
        record.verified = outcome.verified;
        record.comment = outcome.comment;
        Ok(())
    }

    /// Moves a queued file to the completed set.
    pub fn mark_completed(&mut self, path: &str, elapsed: Duration) -> Result<(), VerifyError> {
        self.transition(path, FileState::Completed)?;
        self.timing.completed_duration += elapsed;
        Ok(())
    }

    /// Moves a queued file to the failed set with an explanation.
    pub fn mark_failed(
        &mut self,
        path: &str,
        elapsed: Duration,
        comment: impl Into<String>,
    ) -> Result<(), VerifyError> {
        let idx = self.transition(path, FileState::Failed)?;
        self.records[idx].comment = comment.into();
        self.timing.failed_duration += elapsed;
        Ok(())
    }

    fn queued_record_mut(&mut self, path: &str) -> Result<&mut FileRecord, VerifyError> {
        let idx = *self
            .index
            .get(path)
            .ok_or_else(|| VerifyError::UnknownPath(path.to_string()))?;
        let record = &mut self.records[idx];
        if record.state != FileState::Queued {
            return Err(VerifyError::NotQueued(path.to_string()));
        }
        Ok(record)
    }

    /// The only place a record changes set.
    fn transition(&mut self, path: &str, to: FileState) -> Result<usize, VerifyError> {
        debug_assert_ne!(to, FileState::Queued);
        let idx = *self
            .index
            .get(path)
            .ok_or_else(|| VerifyError::UnknownPath(path.to_string()))?;
        let record = &mut self.records[idx];
        if record.state != FileState::Queued {
            return Err(VerifyError::NotQueued(path.to_string()));
        }
        record.state = to;
        let size = record.size_bytes;

        self.queued.remove(size);
        match to {
            FileState::Completed => self.completed.add(size),
            FileState::Failed => self.failed.add(size),
            FileState::Queued => self.queued.add(size),
        }

        while self.queue_head < self.records.len()
            && self.records[self.queue_head].state != FileState::Queued
        {
            self.queue_head += 1;
        }
        Ok(idx)
    }

    pub fn tally(&self, state: FileState) -> Tally {
        match state {
            FileState::Queued => self.queued,
            FileState::Completed => self.completed,
            FileState::Failed => self.failed,
        }
    }

    pub fn queued_bytes(&self) -> u64 {
        self.queued.bytes
    }

    pub fn completed_bytes(&self) -> u64 {
        self.completed.bytes
    }

    pub fn failed_bytes(&self) -> u64 {
        self.failed.bytes
    }

    pub fn total_bytes(&self) -> u64 {
        self.queued.bytes + self.completed.bytes + self.failed.bytes
    }

    /// Records in one set, in insertion order.
    pub fn records_in(&self, state: FileState) -> impl Iterator<Item = &FileRecord> {
        self.records.iter().filter(move |r| r.state == state)
    }

    /// Every record, in insertion order.
    pub fn records(&self) -> &[FileRecord] {
        &self.records
    }

    /// Hours left at the throughput seen so far; `None` until a file has completed.
    pub fn estimate_remaining_hours(&self) -> Option<f64> {
        if self.completed.bytes == 0 {
            return None;
        }
        let secs_per_byte = self.timing.completed_duration.as_secs_f64() / self.completed.bytes as f64;
        Some(secs_per_byte * self.queued.bytes as f64 / 3600.0)
    }

    /// Starts a new run segment.
    pub fn begin_run(&mut self) {
        info!("Verification started");
        self.timing.run_started_at = Some(SystemTime::now());
        self.timing.last_activity_at = None;
    }

    /// Stamps the end of the current run segment.
    pub fn end_run(&mut self) {
        self.touch();
    }

    /// Records activity in the current run so an interruption keeps its elapsed time.
    pub fn touch(&mut self) {
        self.timing.last_activity_at = Some(SystemTime::now());
    }

    /// Moves the last run segment into the history and clears the activity marker.
    ///
    /// The segment ends at the last recorded activity, or at `saved_at` when the
    /// run recorded none. A session with no run start contributes a zero entry.
    pub fn fold_previous_run(&mut self, saved_at: SystemTime) {
        let end = self.timing.last_activity_at.take().unwrap_or(saved_at);
        let elapsed = self
            .timing
            .run_started_at
            .and_then(|start| end.duration_since(start).ok())
            .unwrap_or_default();
        self.timing.run_history.push(elapsed);
    }

    /// Total elapsed time of earlier runs.
    pub fn previous_runs_duration(&self) -> Duration {
        self.timing.run_history.iter().sum()
    }

    /// Failed records followed by completed records, each in insertion order.
    pub fn merge_completed_and_failed(&self) -> Vec<&FileRecord> {
        self.records_in(FileState::Failed)
            .chain(self.records_in(FileState::Completed))
            .collect()
    }

    /// Rebuilds the lookup index after deserialization and checks the stored tallies.
    pub(crate) fn restore_index(&mut self) -> Result<(), VerifyError> {
        let mut index = HashMap::with_capacity(self.records.len());
        let (mut queued, mut completed, mut failed) =
            (Tally::default(), Tally::default(), Tally::default());

        for (i, record) in self.records.iter().enumerate() {
            if index.insert(record.path.clone(), i).is_some() {
                return Err(VerifyError::CorruptCheckpoint(format!(
                    "path {} appears more than once",
                    record.path
                )));
            }
            match record.state {
                FileState::Queued => queued.add(record.size_bytes),
                FileState::Completed => completed.add(record.size_bytes),
                FileState::Failed => failed.add(record.size_bytes),
            }
        }

        if (queued, completed, failed) != (self.queued, self.completed, self.failed) {
            return Err(VerifyError::CorruptCheckpoint(format!(
                "stored counters {:?}/{:?}/{:?} do not match records {:?}/{:?}/{:?}",
                self.queued, self.completed, self.failed, queued, completed, failed
            )));
        }

        self.index = index;
        self.queue_head = self
            .records
            .iter()
            .position(|r| r.state == FileState::Queued)
            .unwrap_or(self.records.len());
        Ok(())
    }
}
