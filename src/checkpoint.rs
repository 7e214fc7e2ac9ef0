//! Session checkpoints on disk.

use crate::error::VerifyError;
use crate::session::VerificationSession;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

const CHECKPOINT_VERSION: u32 = 1;
const CHECKPOINT_SUFFIX: &str = ".session.json";

#[derive(Serialize)]
struct CheckpointRef<'a> {
    version: u32,
    saved_at: SystemTime,
    session: &'a VerificationSession,
}

#[derive(Deserialize)]
struct CheckpointOwned {
    version: u32,
    saved_at: SystemTime,
    session: VerificationSession,
}

/// Writes and reads session checkpoints in one directory.
///
/// Each run has one checkpoint file, named after the run's start time, which
/// every save overwrites in place.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Checkpoint file for the session's current run.
    pub fn path_for(&self, session: &VerificationSession) -> PathBuf {
        let started = session
            .timing()
            .run_started_at
            .unwrap_or_else(SystemTime::now);
        self.dir.join(checkpoint_name(started))
    }

    /// Writes the full session state, replacing the run's previous checkpoint atomically.
    pub fn save(&self, session: &VerificationSession) -> Result<PathBuf, VerifyError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(session);
        let tmp = path.with_file_name(format!(
            ".{}.tmp.{}",
            path.file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("session"),
            std::process::id()
        ));

        let written = write_checkpoint(&tmp, session).and_then(|_| {
            fs::rename(&tmp, &path)?;
            Ok(())
        });
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        debug!("Checkpoint written to {}", path.display());
        Ok(path)
    }

    /// Restores a session and starts a fresh run segment.
    ///
    /// The elapsed time of the run that wrote the checkpoint is appended to the
    /// session's run history. A run that recorded no activity ends at the save time.
    pub fn load(path: &Path) -> Result<VerificationSession, VerifyError> {
        let content = fs::read_to_string(path)?;
        let checkpoint: CheckpointOwned = serde_json::from_str(&content)?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(VerifyError::CorruptCheckpoint(format!(
                "{} has version {}, expected {}",
                path.display(),
                checkpoint.version,
                CHECKPOINT_VERSION
            )));
        }

        let mut session = checkpoint.session;
        session.restore_index()?;
        session.fold_previous_run(checkpoint.saved_at);
        Ok(session)
    }

    /// Restores the checkpoint of the run that started at `started`.
    pub fn load_run(&self, started: SystemTime) -> Result<VerificationSession, VerifyError> {
        Self::load(&self.dir.join(checkpoint_name(started)))
    }

    /// Most recently modified checkpoint in the directory, if any.
    pub fn latest(&self) -> Result<Option<PathBuf>, VerifyError> {
        if !self.dir.is_dir() {
            return Ok(None);
        }
        let mut newest: Option<(SystemTime, PathBuf)> = None;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') || !name.ends_with(CHECKPOINT_SUFFIX) {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            if newest.as_ref().map_or(true, |(t, _)| modified > *t) {
                newest = Some((modified, entry.path()));
            }
        }
        Ok(newest.map(|(_, path)| path))
    }
}

fn write_checkpoint(tmp: &Path, session: &VerificationSession) -> Result<(), VerifyError> {
    let file = fs::File::create(tmp)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(
        &mut writer,
        &CheckpointRef {
            version: CHECKPOINT_VERSION,
            saved_at: SystemTime::now(),
            session,
        },
    )?;
    writer.flush()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}

/// `2024-05-01T10-30-00Z.session.json`
fn checkpoint_name(started: SystemTime) -> String {
    let stamp = humantime::format_rfc3339_seconds(started)
        .to_string()
        .replace(':', "-");
    format!("{}{}", stamp, CHECKPOINT_SUFFIX)
}
