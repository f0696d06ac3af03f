//! Storage Errors
//!
//! Every fallible engine operation returns [`StoreError`]. Each variant carries
//! the key or path it concerns so a caller can diagnose a failure without
//! additional context.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors produced by the storage engine.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key is empty or would place data outside the base directory.
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    /// No data file exists for the key.
    #[error("key {key:?} not found at {}", path.display())]
    NotFound { key: String, path: PathBuf },

    /// A single value is larger than the whole cache.
    #[error("value for key {key:?} is {size} bytes, cache capacity is {capacity} bytes")]
    CapacityExceeded {
        key: String,
        size: u64,
        capacity: u64,
    },

    /// A filesystem call failed.
    #[error("{op} failed for {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A partially written file could not be cleaned up after `original`.
    #[error("{original}; cleanup of {} also failed: {source}", path.display())]
    Cleanup {
        original: Box<StoreError>,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A backup record could not be decoded.
    #[error("corrupt backup record #{record} in {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        record: usize,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid_key(key: &str, reason: &'static str) -> Self {
        StoreError::InvalidKey {
            key: key.to_string(),
            reason,
        }
    }

    /// Returns true if this is a [`StoreError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Returns true if this is a [`StoreError::CapacityExceeded`].
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, StoreError::CapacityExceeded { .. })
    }

    /// Finds a `StoreError` carried inside an `io::Error` produced by a value stream.
    pub fn from_stream_error(err: &io::Error) -> Option<&StoreError> {
        err.get_ref().and_then(|inner| inner.downcast_ref::<StoreError>())
    }
}

impl From<StoreError> for io::Error {
    fn from(err: StoreError) -> Self {
        let kind = match &err {
            StoreError::NotFound { .. } => io::ErrorKind::NotFound,
            StoreError::InvalidKey { .. } => io::ErrorKind::InvalidInput,
            StoreError::Io { source, .. } => source.kind(),
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_keeps_original_error() {
        let original = StoreError::io(
            "copy",
            "/tmp/x",
            io::Error::new(io::ErrorKind::BrokenPipe, "boom"),
        );
        let err = StoreError::Cleanup {
            original: Box::new(original),
            path: PathBuf::from("/tmp/x"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };

        let message = err.to_string();
        assert!(message.contains("copy failed"));
        assert!(message.contains("boom"));
        assert!(message.contains("cleanup"));
        assert!(message.contains("denied"));
    }

    #[test]
    fn test_stream_error_roundtrip() {
        let err: io::Error = StoreError::CapacityExceeded {
            key: "big".into(),
            size: 10,
            capacity: 5,
        }
        .into();

        let inner = StoreError::from_stream_error(&err).unwrap();
        assert!(inner.is_capacity_exceeded());
        assert!(StoreError::from_stream_error(&io::Error::other("plain")).is_none());
    }
}
