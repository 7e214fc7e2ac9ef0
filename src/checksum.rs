//! ETag computation: whole-file MD5 and the multipart "MD5 of MD5s" scheme.
//!
//! A multipart ETag looks like `<hex>-<parts>`. The store hashes each part,
//! hashes the concatenation of those binary digests, and appends the part
//! count. The part size is not recorded anywhere, so it has to be recovered
//! from the object size and part count before the ETag can be reproduced.

use crate::error::VerifyError;
use crate::types::FingerprintKind;
use md5::{Digest, Md5};
use std::io::Read;
use std::path::Path;

pub const BLOCK_SIZE_64KB: u64 = 65_536;
pub const BLOCK_SIZE_1MB: u64 = 1_048_576;
pub const BLOCK_SIZE_8MB: u64 = 8 * BLOCK_SIZE_1MB;
pub const BLOCK_SIZE_15MB: u64 = 15 * BLOCK_SIZE_1MB;
pub const BLOCK_SIZE_16MB: u64 = 16 * BLOCK_SIZE_1MB;
pub const BLOCK_SIZE_32MB: u64 = 32 * BLOCK_SIZE_1MB;
pub const BLOCK_SIZE_64MB: u64 = 64 * BLOCK_SIZE_1MB;
pub const BLOCK_SIZE_128MB: u64 = 128 * BLOCK_SIZE_1MB;

/// Ordered list of part sizes tried when reproducing a multipart ETag.
///
/// Fixed sizes are tried first, in order, followed (unless disabled) by a
/// size computed from the object itself: `ceil(size / parts)` rounded up to a
/// whole mebibyte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartSizeCandidates {
    fixed: Vec<u64>,
    computed_fallback: bool,
}

impl Default for PartSizeCandidates {
    fn default() -> Self {
        Self {
            fixed: vec![
                BLOCK_SIZE_64KB,
                BLOCK_SIZE_8MB,
                BLOCK_SIZE_15MB,
                BLOCK_SIZE_16MB,
                BLOCK_SIZE_32MB,
                BLOCK_SIZE_64MB,
                BLOCK_SIZE_128MB,
            ],
            computed_fallback: true,
        }
    }
}

impl PartSizeCandidates {
    /// Candidates with the given fixed sizes and the computed fallback enabled.
    pub fn new(fixed: Vec<u64>) -> Self {
        Self {
            fixed,
            computed_fallback: true,
        }
    }

    pub fn without_fallback(mut self) -> Self {
        self.computed_fallback = false;
        self
    }

    pub fn fixed(&self) -> &[u64] {
        &self.fixed
    }

    pub fn has_computed_fallback(&self) -> bool {
        self.computed_fallback
    }

    /// Every candidate for this object, in priority order.
    pub fn candidates(&self, size: u64, parts: u64) -> Vec<u64> {
        let mut all = self.fixed.clone();
        if self.computed_fallback {
            all.extend(computed_part_size(size, parts));
        }
        all
    }

    /// Picks the first candidate that splits `size` bytes into exactly `parts` parts.
    pub fn infer(&self, size: u64, parts: u64) -> Result<u64, VerifyError> {
        self.candidates(size, parts)
            .into_iter()
            .find(|&part_size| part_size_fits(size, parts, part_size))
            .ok_or(VerifyError::PartSizeUnresolved { size, parts })
    }
}

/// `ceil(size / parts)` rounded up to a whole mebibyte.
///
/// `None` when `parts` is zero or the rounded size does not fit in a `u64`.
pub fn computed_part_size(size: u64, parts: u64) -> Option<u64> {
    if parts == 0 {
        return None;
    }
    size.div_ceil(parts)
        .div_ceil(BLOCK_SIZE_1MB)
        .checked_mul(BLOCK_SIZE_1MB)
}

/// `parts * part_size >= size > (parts - 1) * part_size`
pub fn part_size_fits(size: u64, parts: u64, part_size: u64) -> bool {
    if parts == 0 || part_size == 0 {
        return false;
    }
    let (size, parts, part_size) = (size as u128, parts as u128, part_size as u128);
    parts * part_size >= size && size > (parts - 1) * part_size
}

/// Removes the `"` quoting the store puts around ETags. Safe to apply repeatedly.
pub fn strip_quotes(etag: &str) -> &str {
    etag.trim().trim_matches('"')
}

/// Shape of a remote ETag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintShape {
    Simple,
    Chunked { parts: u64 },
}

impl FingerprintShape {
    pub fn kind(&self) -> FingerprintKind {
        match self {
            FingerprintShape::Simple => FingerprintKind::Simple,
            FingerprintShape::Chunked { .. } => FingerprintKind::Chunked,
        }
    }
}

/// An ETag ending in `-<digits>` is multipart; anything else is a plain MD5.
pub fn classify_fingerprint(etag: &str) -> FingerprintShape {
    let etag = strip_quotes(etag);
    match etag.rsplit_once('-') {
        Some((digest, count))
            if !digest.is_empty()
                && !count.is_empty()
                && count.bytes().all(|b| b.is_ascii_digit()) =>
        {
            match count.parse() {
                Ok(parts) => FingerprintShape::Chunked { parts },
                Err(_) => FingerprintShape::Simple,
            }
        }
        _ => FingerprintShape::Simple,
    }
}

/// Computes local digests compatible with the store's ETags.
#[derive(Debug, Clone, Default)]
pub struct ChecksumEngine {
    part_sizes: PartSizeCandidates,
}

impl ChecksumEngine {
    pub fn new(part_sizes: PartSizeCandidates) -> Self {
        Self { part_sizes }
    }

    pub fn part_sizes(&self) -> &PartSizeCandidates {
        &self.part_sizes
    }

    /// Computes the MD5 of a local file as lowercase hex.
    ///
    /// The file is streamed in 64 KiB blocks; the handle is closed on return.
    pub fn whole_file_digest(&self, path: &Path) -> Result<String, VerifyError> {
        let file = std::fs::File::open(path)?;
        let mut reader = std::io::BufReader::with_capacity(BLOCK_SIZE_64KB as usize, file);
        let mut hasher = Md5::new();
        let mut buffer = vec![0u8; BLOCK_SIZE_64KB as usize];

        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Recovers the part size the store used for an object of `size` bytes in `parts` parts.
    pub fn infer_part_size(&self, size: u64, parts: u64) -> Result<u64, VerifyError> {
        self.part_sizes.infer(size, parts)
    }

    /// Reproduces a `<hex>-<parts>` ETag for a local file.
    ///
    /// The part size is inferred from the file's length and `parts`; fails with
    /// [`VerifyError::PartSizeUnresolved`] when no candidate fits.
    pub fn chunked_digest(&self, path: &Path, parts: u64) -> Result<String, VerifyError> {
        let size = std::fs::metadata(path)?.len();
        let part_size = self.infer_part_size(size, parts)?;
        self.chunked_digest_with_part_size(path, part_size)
    }

    /// Computes a multipart ETag for a local file split into `part_size` chunks.
    ///
    /// The suffix is the number of parts actually read, so a truncated file
    /// yields a different ETag rather than a padded one.
    pub fn chunked_digest_with_part_size(
        &self,
        path: &Path,
        part_size: u64,
    ) -> Result<String, VerifyError> {
        if part_size == 0 {
            return Err(VerifyError::PartSizeUnresolved {
                size: std::fs::metadata(path)?.len(),
                parts: 0,
            });
        }

        let file = std::fs::File::open(path)?;
        let mut reader = std::io::BufReader::with_capacity(BLOCK_SIZE_64KB as usize, file);
        let mut buffer = vec![0u8; BLOCK_SIZE_64KB as usize];
        let mut part_digests = Vec::new();
        let mut part = Md5::new();
        let mut filled: u64 = 0;

        loop {
            let want = (part_size - filled).min(BLOCK_SIZE_64KB) as usize;
            let n = reader.read(&mut buffer[..want])?;
            if n == 0 {
                break;
            }
            part.update(&buffer[..n]);
            filled += n as u64;
            if filled == part_size {
                part_digests.push(std::mem::replace(&mut part, Md5::new()).finalize());
                filled = 0;
            }
        }
        if filled > 0 {
            part_digests.push(part.finalize());
        }

        let mut outer = Md5::new();
        for digest in &part_digests {
            outer.update(digest);
        }
        Ok(format!("{:x}-{}", outer.finalize(), part_digests.len()))
    }
}
