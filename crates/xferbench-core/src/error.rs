//! Error types for the benchmark core

use thiserror::Error;

/// Result type alias for benchmark operations.
pub type BenchResult<T> = Result<T, BenchError>;

/// Failure reported by a remote store operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("remote store error {code}: {message}")]
pub struct StoreError {
    /// Store-specific error code (negative values mirror server-side status codes).
    pub code: i32,
    /// Human readable description.
    pub message: String,
}

impl StoreError {
    /// Object does not exist.
    pub const NOT_FOUND: i32 = -808000;
    /// Local file could not be read or written.
    pub const LOCAL_IO: i32 = -510000;
    /// Store is not reachable or was closed.
    pub const UNAVAILABLE: i32 = -305000;
    /// Target exists and overwrite was not requested.
    pub const OVERWRITE_WITHOUT_FORCE: i32 = -312000;

    /// Build an error with the given code.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Convenience for a missing object.
    pub fn not_found(path: &str) -> Self {
        Self::new(Self::NOT_FOUND, format!("object not found: {}", path))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => Self::new(Self::NOT_FOUND, e.to_string()),
            _ => Self::new(Self::LOCAL_IO, e.to_string()),
        }
    }
}

/// All errors that can occur while probing, transferring or verifying.
#[derive(Debug, Error)]
pub enum BenchError {
    /// No probe sample succeeded; compression must be disabled.
    #[error("Network unavailable: all {attempted} probe samples failed")]
    NetworkUnavailable {
        /// Number of samples that were attempted.
        attempted: usize,
    },
    /// Compression or decompression raised or produced no output.
    #[error("Codec failure: {0}")]
    CodecFailure(String),
    /// A store operation failed or returned the wrong size.
    #[error("Remote transfer failed ({code}): {message}")]
    RemoteTransferFailure {
        /// Store error code, or 0 for size mismatches detected locally.
        code: i32,
        /// Description of the failure.
        message: String,
    },
    /// Size or hash mismatch after the round trip.
    #[error("Verification failed: {0}")]
    VerificationFailure(String),
    /// Attaching compression metadata failed. Never fatal to a run.
    #[error("Metadata write failed: {0}")]
    MetadataWriteFailure(String),
    /// Rejected configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// Cancellation was requested; the attempt stopped at a stage boundary.
    #[error("Interrupted")]
    Interrupted,
    /// Local I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for BenchError {
    fn from(e: StoreError) -> Self {
        BenchError::RemoteTransferFailure {
            code: e.code,
            message: e.message,
        }
    }
}

impl BenchError {
    /// Size mismatch detected after a put or get.
    pub fn size_mismatch(what: &str, expected: u64, actual: u64) -> Self {
        BenchError::RemoteTransferFailure {
            code: 0,
            message: format!("{} size mismatch: expected {} bytes, got {}", what, expected, actual),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_converts_to_transfer_failure() {
        let err: BenchError = StoreError::not_found("/zone/home/a").into();
        match err {
            BenchError::RemoteTransferFailure { code, message } => {
                assert_eq!(code, StoreError::NOT_FOUND);
                assert!(message.contains("/zone/home/a"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_io_not_found_maps_to_store_code() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(StoreError::from(io).code, StoreError::NOT_FOUND);
        let io = std::io::Error::other("disk");
        assert_eq!(StoreError::from(io).code, StoreError::LOCAL_IO);
    }

    #[test]
    fn test_display_messages() {
        let e = BenchError::NetworkUnavailable { attempted: 3 };
        assert_eq!(e.to_string(), "Network unavailable: all 3 probe samples failed");
        let e = BenchError::size_mismatch("upload", 10, 7);
        assert!(e.to_string().contains("expected 10 bytes, got 7"));
    }
}
