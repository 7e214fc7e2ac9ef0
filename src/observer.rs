//! Progress reporting hooks called by the orchestrator.

use crate::error::VerifyError;
use crate::orchestrator::RunSummary;
use crate::session::VerificationSession;
use crate::types::{FileRecord, FileState};
use std::path::Path;
use tracing::{error, info, warn};

/// Receives progress events from a verification run. Every method defaults to doing nothing.
pub trait VerificationObserver {
    fn run_started(&mut self, _session: &VerificationSession) {}

    fn file_started(&mut self, _record: &FileRecord) {}

    /// Called once the record has moved to the completed or failed set.
    fn file_finished(&mut self, _record: &FileRecord, _session: &VerificationSession) {}

    fn checkpoint_written(&mut self, _path: &Path) {}

    fn checkpoint_failed(&mut self, _error: &VerifyError) {}

    fn run_finished(&mut self, _session: &VerificationSession, _summary: &RunSummary) {}
}

/// Narrates the run through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl VerificationObserver for TracingObserver {
    fn run_started(&mut self, session: &VerificationSession) {
        let queued = session.tally(FileState::Queued);
        info!(
            "Verifying {} files ({} bytes) in bucket {}",
            queued.files,
            queued.bytes,
            session.target().bucket
        );
        if !session.timing().run_history.is_empty() {
            info!(
                "Resuming after {} earlier run(s) totalling {}",
                session.timing().run_history.len(),
                humantime::format_duration(session.previous_runs_duration())
            );
        }
    }

    fn file_started(&mut self, record: &FileRecord) {
        info!("🔍 Verifying {}", record.path);
    }

    fn file_finished(&mut self, record: &FileRecord, session: &VerificationSession) {
        match record.state {
            FileState::Completed => {
                info!("✅ {} verified", record.path);
                if let Some(hours) = session.estimate_remaining_hours() {
                    info!("Estimated time remaining {:.2} hours", hours);
                }
            }
            _ => warn!("❌ {} failed: {}", record.path, record.comment),
        }
    }

    fn checkpoint_written(&mut self, path: &Path) {
        info!("💾 Session saved to {}", path.display());
    }

    fn checkpoint_failed(&mut self, err: &VerifyError) {
        error!("Failed to write session checkpoint: {}", err);
    }

    fn run_finished(&mut self, _session: &VerificationSession, summary: &RunSummary) {
        info!(
            "Verification finished: {} verified, {} failed, {} remaining{}",
            summary.verified,
            summary.failed,
            summary.remaining,
            if summary.stopped { " (stopped)" } else { "" }
        );
    }
}

/// Shows a byte-based progress bar on the terminal.
pub struct ProgressObserver {
    pb: indicatif::ProgressBar,
}

impl ProgressObserver {
    pub fn new() -> Self {
        let pb = indicatif::ProgressBar::new(0);
        pb.set_style(
            indicatif::ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg} | {elapsed_precise} elapsed, ETA {eta_precise}")
                .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
                .progress_chars("█▓▒░ "),
        );
        Self { pb }
    }

    fn sync(&self, session: &VerificationSession) {
        self.pb.set_length(session.total_bytes());
        self.pb
            .set_position(session.completed_bytes() + session.failed_bytes());
    }
}

impl Default for ProgressObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl VerificationObserver for ProgressObserver {
    fn run_started(&mut self, session: &VerificationSession) {
        self.sync(session);
        self.pb.set_message(format!(
            "📦 Verifying {} files",
            session.tally(FileState::Queued).files
        ));
    }

    fn file_started(&mut self, record: &FileRecord) {
        self.pb.set_message(format!("| 🔍 {}", record.file_name()));
    }

    fn file_finished(&mut self, record: &FileRecord, session: &VerificationSession) {
        self.sync(session);
        if record.state == FileState::Failed {
            self.pb
                .println(format!("❌ {}: {}", record.path, record.comment));
        }
    }

    fn checkpoint_failed(&mut self, err: &VerifyError) {
        self.pb
            .println(format!("⚠️  Failed to write session checkpoint: {}", err));
    }

    fn run_finished(&mut self, session: &VerificationSession, summary: &RunSummary) {
        self.sync(session);
        let icon = if summary.failed == 0 { "✅" } else { "❌" };
        self.pb.finish_with_message(format!(
            "{} {} verified, {} failed",
            icon, summary.verified, summary.failed
        ));
    }
}
