//! Shared error type for the TTS media pipeline's domain crates.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for cache-key derivation, provider/priority parsing, and other
/// domain-level invariant violations shared across the pipeline crates.
///
/// Designed to be serializable and not depend on external error types like
/// `std::io::Error`, matching the pattern used throughout this workspace.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum TtsCoreError {
    /// An unrecognized TTS provider identifier was supplied.
    #[error("unknown provider: {value}")]
    UnknownProvider {
        /// The raw string that failed to parse as a `Provider`.
        value: String,
    },

    /// An unrecognized priority level was supplied.
    #[error("unknown priority: {value}")]
    UnknownPriority {
        /// The raw string or number that failed to parse as a `Priority`.
        value: String,
    },

    /// The text to synthesize was empty after normalization.
    #[error("cache key text must not be empty")]
    EmptyText,
}

impl TtsCoreError {
    /// Create an unknown-provider error.
    pub fn unknown_provider(value: impl Into<String>) -> Self {
        Self::UnknownProvider { value: value.into() }
    }

    /// Create an unknown-priority error.
    pub fn unknown_priority(value: impl Into<String>) -> Self {
        Self::UnknownPriority { value: value.into() }
    }

    /// Whether retrying the same operation could plausibly succeed.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }

    /// User-facing projection distinct from `Display`.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::UnknownProvider { value } => {
                format!("'{value}' is not a supported TTS provider.")
            }
            Self::UnknownPriority { value } => format!("'{value}' is not a valid priority."),
            Self::EmptyText => "The text to synthesize cannot be empty.".to_string(),
        }
    }
}

/// Convenience result type for `tts-core` operations.
pub type TtsCoreResult<T> = Result<T, TtsCoreError>;
