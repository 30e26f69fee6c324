//! Transfer verification: object presence, sizes and SHA-256 content equality.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{BenchError, BenchResult};
use crate::store::RemoteStore;

const HASH_BUF: usize = 64 * 1024;

/// Outcome of a size check: whether it matched and the size actually found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeCheck {
    /// True when the actual size equals the expected size.
    pub ok: bool,
    /// Size found, 0 if the object or file does not exist.
    pub actual_size: u64,
}

impl SizeCheck {
    fn compare(expected: u64, actual: u64) -> Self {
        Self {
            ok: actual == expected,
            actual_size: actual,
        }
    }

    /// Turn a failed check into a transfer error.
    pub fn into_result(self, what: &str, expected: u64) -> BenchResult<u64> {
        if self.ok {
            Ok(self.actual_size)
        } else {
            Err(BenchError::size_mismatch(what, expected, self.actual_size))
        }
    }
}

/// Check that a remote object exists with the expected size.
pub async fn verify_upload(store: &dyn RemoteStore, remote_path: &str, expected_size: u64) -> SizeCheck {
    match store.stat_size(remote_path).await {
        Ok(actual) => SizeCheck::compare(expected_size, actual),
        Err(e) => {
            warn!(remote_path, error = %e, "upload verification could not stat object");
            SizeCheck {
                ok: false,
                actual_size: 0,
            }
        }
    }
}

/// Check that a downloaded file exists with the expected size.
pub fn verify_download(local_path: &Path, expected_size: u64) -> SizeCheck {
    match std::fs::metadata(local_path) {
        Ok(meta) if meta.is_file() => SizeCheck::compare(expected_size, meta.len()),
        _ => SizeCheck {
            ok: false,
            actual_size: 0,
        },
    }
}

/// Hex SHA-256 of a file's contents.
pub fn sha256_file(path: &Path) -> BenchResult<String> {
    let mut reader = BufReader::with_capacity(HASH_BUF, File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUF];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Fingerprint of an original file taken before its round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFingerprint {
    /// Length in bytes.
    pub size: u64,
    /// Hex SHA-256, absent when hashing is disabled.
    pub sha256: Option<String>,
}

impl FileFingerprint {
    /// Fingerprint `path`, hashing only when `with_hash` is set.
    pub fn of(path: &Path, with_hash: bool) -> BenchResult<Self> {
        let size = std::fs::metadata(path)?.len();
        let sha256 = if with_hash { Some(sha256_file(path)?) } else { None };
        Ok(Self { size, sha256 })
    }

    /// Compare `final_path` against this fingerprint.
    ///
    /// Any size or hash mismatch is a [`BenchError::VerificationFailure`].
    pub fn verify(&self, final_path: &Path) -> BenchResult<()> {
        let final_size = std::fs::metadata(final_path)
            .map_err(|e| BenchError::VerificationFailure(format!("final file unreadable: {}", e)))?
            .len();
        if final_size != self.size {
            return Err(BenchError::VerificationFailure(format!(
                "size mismatch: original {} bytes, final {} bytes",
                self.size, final_size
            )));
        }
        if let Some(expected) = &self.sha256 {
            let actual = sha256_file(final_path)?;
            if &actual != expected {
                return Err(BenchError::VerificationFailure(format!(
                    "sha256 mismatch: original {}, final {}",
                    expected, actual
                )));
            }
        }
        debug!(size = self.size, hashed = self.sha256.is_some(), "round trip verified");
        Ok(())
    }
}

/// True when both files have the same length and SHA-256.
pub fn verify_round_trip(original: &Path, final_path: &Path) -> BenchResult<bool> {
    let fingerprint = FileFingerprint::of(original, true)?;
    match fingerprint.verify(final_path) {
        Ok(()) => Ok(true),
        Err(BenchError::VerificationFailure(reason)) => {
            warn!(original = %original.display(), %reason, "round trip mismatch");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}
