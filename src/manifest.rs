//! File manifests: the CSV lists of files a session verifies.
//!
//! A manifest needs `File Path` and `Size` columns. `MD5 Checksum` and `Etag`
//! are optional known-good digests; any other column is ignored.

use crate::checksum::ChecksumEngine;
use crate::error::VerifyError;
use crate::session::VerificationSession;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use tracing::{info, warn};
use walkdir::WalkDir;

pub const FILE_NAME: &str = "File Name";
pub const FILE_PATH: &str = "File Path";
pub const SIZE: &str = "Size";
pub const MD5_CHECKSUM: &str = "MD5 Checksum";
pub const ETAG: &str = "Etag";

/// One file listed in a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRow {
    pub path: String,
    pub size_bytes: u64,
    pub reference_digest: Option<String>,
    pub reference_chunked_digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRow {
    #[serde(rename = "File Path")]
    path: Option<String>,
    #[serde(rename = "Size")]
    size: Option<String>,
    #[serde(rename = "MD5 Checksum", default)]
    md5: Option<String>,
    #[serde(rename = "Etag", default)]
    etag: Option<String>,
}

/// Manifest line produced by [`generate_manifest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    #[serde(rename = "File Name")]
    pub name: String,
    #[serde(rename = "File Path")]
    pub path: String,
    #[serde(rename = "Size")]
    pub size_bytes: u64,
    #[serde(rename = "MD5 Checksum")]
    pub md5: String,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Parses a manifest. Any malformed row fails the whole manifest.
pub fn read_manifest<R: io::Read>(reader: R) -> Result<Vec<ManifestRow>, VerifyError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    for required in [FILE_PATH, SIZE] {
        if !headers.iter().any(|h| h == required) {
            return Err(VerifyError::Manifest(format!(
                "missing required column '{}' (expected columns '{}', '{}' and optionally '{}', '{}')",
                required, FILE_PATH, SIZE, MD5_CHECKSUM, ETAG
            )));
        }
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let line = record.position().map_or(0, |p| p.line());
        let raw: RawRow = record.deserialize(Some(&headers))?;

        let path = non_empty(raw.path).ok_or_else(|| {
            VerifyError::Manifest(format!("line {}: missing value for '{}'", line, FILE_PATH))
        })?;
        let size = non_empty(raw.size).ok_or_else(|| {
            VerifyError::Manifest(format!("line {}: missing value for '{}'", line, SIZE))
        })?;
        let size_bytes = size.parse::<u64>().map_err(|e| {
            VerifyError::Manifest(format!("line {}: invalid size '{}': {}", line, size, e))
        })?;

        rows.push(ManifestRow {
            path,
            size_bytes,
            reference_digest: non_empty(raw.md5),
            reference_chunked_digest: non_empty(raw.etag),
        });
    }
    Ok(rows)
}

/// Reads a manifest file from disk.
pub fn load_manifest(path: &Path) -> Result<Vec<ManifestRow>, VerifyError> {
    let file = std::fs::File::open(path)?;
    read_manifest(file).map_err(|e| match e {
        VerifyError::Manifest(msg) => {
            VerifyError::Manifest(format!("{}: {}", path.display(), msg))
        }
        other => other,
    })
}

/// Queues manifest rows in order. Returns the number of files added.
pub fn queue_manifest(
    session: &mut VerificationSession,
    rows: Vec<ManifestRow>,
) -> Result<usize, VerifyError> {
    let count = rows.len();
    for row in rows {
        session.enqueue(
            row.path,
            row.size_bytes,
            row.reference_digest,
            row.reference_chunked_digest,
        )?;
    }
    Ok(count)
}

/// Lists every file under `root` with its size and MD5.
///
/// Paths are relative to `root` and use `/` separators. Files that cannot be
/// read are logged and left out.
pub fn generate_manifest(
    root: &Path,
    engine: &ChecksumEngine,
) -> Result<Vec<ManifestEntry>, VerifyError> {
    info!("Collecting file list under {}", root.display());
    let mut entries = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("⚠️  Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = match entry.path().strip_prefix(root) {
            Ok(rel) => rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/"),
            Err(_) => continue,
        };

        let size_bytes = match entry.metadata() {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!("⚠️  Error getting metadata for file {}: {}", relative, e);
                continue;
            }
        };
        let md5 = match engine.whole_file_digest(entry.path()) {
            Ok(md5) => md5,
            Err(e) => {
                warn!("⚠️  Error hashing file {}: {}", relative, e);
                continue;
            }
        };

        entries.push(ManifestEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            path: relative,
            size_bytes,
            md5,
        });
    }

    info!("Found {} files", entries.len());
    Ok(entries)
}

/// Writes generated entries as a manifest CSV with a header row.
pub fn write_manifest<W: io::Write>(writer: W, entries: &[ManifestEntry]) -> Result<(), VerifyError> {
    let mut writer = csv::Writer::from_writer(writer);
    if entries.is_empty() {
        writer.write_record([FILE_NAME, FILE_PATH, SIZE, MD5_CHECKSUM])?;
    }
    for entry in entries {
        writer.serialize(entry)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VerificationTarget;

    #[test]
    fn test_read_manifest_with_optional_columns() {
        let csv = "\
File Name,File Path,Size,MD5 Checksum,Etag
a.txt,dir/a.txt,11,5EB63BBBE01EEED093CB22BB8F5ACDC3,
b.bin,b.bin, 2048 ,,abc-2
";
        let rows = read_manifest(csv.as_bytes()).unwrap();
        assert_eq!(
            rows,
            vec![
                ManifestRow {
                    path: "dir/a.txt".into(),
                    size_bytes: 11,
                    reference_digest: Some("5EB63BBBE01EEED093CB22BB8F5ACDC3".into()),
                    reference_chunked_digest: None,
                },
                ManifestRow {
                    path: "b.bin".into(),
                    size_bytes: 2048,
                    reference_digest: None,
                    reference_chunked_digest: Some("abc-2".into()),
                },
            ]
        );
    }

    #[test]
    fn test_read_manifest_without_digest_columns() {
        let rows = read_manifest("File Path,Size\nx,1\n".as_bytes()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].reference_digest, None);
    }

    #[test]
    fn test_missing_required_column() {
        let err = read_manifest("File Path,MD5 Checksum\nx,abc\n".as_bytes()).unwrap_err();
        assert!(matches!(err, VerifyError::Manifest(msg) if msg.contains("'Size'")));
    }

    #[test]
    fn test_malformed_row_fails_whole_load() {
        let err = read_manifest("File Path,Size\nok,1\n,2\nlater,3\n".as_bytes()).unwrap_err();
        assert!(matches!(err, VerifyError::Manifest(msg) if msg.contains("line 3")));

        let err = read_manifest("File Path,Size\nx,ten\n".as_bytes()).unwrap_err();
        assert!(matches!(err, VerifyError::Manifest(msg) if msg.contains("invalid size")));
    }

    #[test]
    fn test_queue_manifest_rejects_duplicates() {
        let mut session = VerificationSession::new(VerificationTarget::default());
        let rows = read_manifest("File Path,Size\na,1\nb,2\n".as_bytes()).unwrap();
        assert_eq!(queue_manifest(&mut session, rows.clone()).unwrap(), 2);
        assert_eq!(session.queued_bytes(), 3);

        assert!(matches!(
            queue_manifest(&mut session, rows),
            Err(VerifyError::DuplicatePath(p)) if p == "a"
        ));
    }

    #[test]
    fn test_generated_manifest_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("top.txt"), b"hello world").unwrap();
        std::fs::write(dir.path().join("sub/inner.bin"), b"").unwrap();

        let entries = generate_manifest(dir.path(), &ChecksumEngine::default()).unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["sub/inner.bin", "top.txt"]);
        assert_eq!(entries[1].name, "top.txt");
        assert_eq!(entries[1].md5, "5eb63bbbe01eeed093cb22bb8f5acdc3");

        let mut buffer = Vec::new();
        write_manifest(&mut buffer, &entries).unwrap();
        let rows = read_manifest(buffer.as_slice()).unwrap();
        assert_eq!(rows[1].path, "top.txt");
        assert_eq!(rows[1].size_bytes, 11);
        assert_eq!(rows[0].reference_digest.as_deref(), Some("d41d8cd98f00b204e9800998ecf8427e"));
    }

    #[test]
    fn test_load_manifest_names_file_in_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "Size\n1\n").unwrap();
        let err = load_manifest(&path).unwrap_err();
        assert!(err.to_string().contains("bad.csv"));
    }
}
