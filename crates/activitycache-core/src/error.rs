//! Error types for the activity cache.

use thiserror::Error;

/// Errors that can occur while reading or writing the cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The caller passed inconsistent input (e.g. activities from another chain).
    /// Raised before any write.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Interval bookkeeping diverged: the merge worklist went deeper than allowed.
    #[error("Interval consistency violated at merge depth {depth}: {reason}")]
    Consistency { depth: usize, reason: String },

    /// The storage backend failed (I/O, lock, serialization).
    #[error("Storage error: {0}")]
    Storage(String),

    /// A write was attempted inside a read-only transaction.
    #[error("Write attempted in a read-only transaction")]
    ReadOnly,

    /// A level-family pointer carried a timestamp that is not RFC 3339.
    #[error("Invalid position: {0}")]
    Position(String),
}

impl CacheError {
    /// Returns `true` if retrying the whole call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns `true` if the stored intervals can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Consistency { .. })
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(format!("serialization: {e}"))
    }
}
