//! Verification reports.

use crate::error::VerifyError;
use crate::types::{FileRecord, FileState};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::info;

pub const REPORT_COLUMNS: [&str; 10] = [
    "File Name",
    "File Path",
    "Size",
    "Reference MD5 Checksum",
    "Reference Etag",
    "Remote Etag",
    "Calculated Etag",
    "Etag Format",
    "Verified",
    "Comment",
];

/// Consumes the finished records of a session (failed first, then completed).
pub trait ReportSink {
    fn write_report(&mut self, records: &[&FileRecord]) -> Result<(), VerifyError>;
}

/// One CSV row per record.
pub fn report_row(record: &FileRecord) -> [String; 10] {
    let comment = match record.state {
        FileState::Completed => "Verified".to_string(),
        _ => record.comment.clone(),
    };
    [
        record.file_name().to_string(),
        record.path.clone(),
        record.size_bytes.to_string(),
        record.reference_digest.clone().unwrap_or_default(),
        record.reference_chunked_digest.clone().unwrap_or_default(),
        record.remote_fingerprint.clone().unwrap_or_default(),
        record.computed_fingerprint.clone().unwrap_or_default(),
        record
            .fingerprint_kind
            .map(|k| k.to_string())
            .unwrap_or_default(),
        record.verified.unwrap_or(false).to_string(),
        comment,
    ]
}

/// Writes the report to any writer.
pub fn write_csv_report<W: io::Write>(writer: W, records: &[&FileRecord]) -> Result<(), VerifyError> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(REPORT_COLUMNS)?;
    for record in records {
        writer.write_record(report_row(record))?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes `{output_dir}/{timestamp}_verification.csv`.
#[derive(Debug, Clone)]
pub struct CsvReport {
    output_dir: PathBuf,
    written: Option<PathBuf>,
}

impl CsvReport {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            written: None,
        }
    }

    /// Path of the last report written.
    pub fn written(&self) -> Option<&Path> {
        self.written.as_deref()
    }
}

impl ReportSink for CsvReport {
    fn write_report(&mut self, records: &[&FileRecord]) -> Result<(), VerifyError> {
        std::fs::create_dir_all(&self.output_dir)?;
        let stamp = humantime::format_rfc3339_seconds(SystemTime::now())
            .to_string()
            .replace(':', "-");
        let path = self.output_dir.join(format!("{}_verification.csv", stamp));
        info!("Writing report {}", path.display());

        let file = std::fs::File::create(&path)?;
        write_csv_report(io::BufWriter::new(file), records)?;
        self.written = Some(path);
        Ok(())
    }
}
