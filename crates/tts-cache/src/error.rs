//! Error type for the audio cache store.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by [`crate::store::AudioCacheStore`].
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum CacheError {
    /// I/O error during cache file or index operations.
    #[error("I/O error ({kind}): {message}")]
    Io {
        /// The kind of I/O error (e.g. "not found", "permission denied").
        kind: String,
        /// Detailed error message.
        message: String,
    },

    /// The on-disk index file could not be parsed as JSON.
    #[error("cache index is corrupt: {message}")]
    CorruptIndex {
        /// Parse failure detail.
        message: String,
    },
}

impl CacheError {
    /// Create an I/O error from a `std::io::Error`.
    #[must_use]
    pub fn from_io_error(err: &std::io::Error) -> Self {
        Self::Io {
            kind: format!("{:?}", err.kind()),
            message: err.to_string(),
        }
    }

    /// Create a corrupt-index error.
    pub fn corrupt_index(message: impl Into<String>) -> Self {
        Self::CorruptIndex {
            message: message.into(),
        }
    }

    /// Whether the failing operation is worth retrying.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}

/// Convenience result type for cache store operations.
pub type CacheResult<T> = Result<T, CacheError>;
