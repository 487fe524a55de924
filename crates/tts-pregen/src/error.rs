//! Error type for the pre-gen job engine, profile manager, and comparison
//! session manager.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tts_db::DbError;
use tts_pool::PoolError;

/// Errors raised by `tts-pregen`'s managers.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum PregenError {
    /// The persistence layer rejected or failed an operation.
    #[error("database error: {0}")]
    Database(#[from] DbError),

    /// Synthesis against an upstream TTS provider failed.
    #[error("TTS generation error: {0}")]
    Generation(#[from] PoolError),

    /// An API-level invariant was violated before any state was mutated
    /// (e.g. starting a non-pending job, pausing a job that isn't running).
    #[error("policy violation: {message}")]
    PolicyViolation {
        /// Human-readable description of the violated invariant.
        message: String,
    },

    /// A caller-supplied output directory resolved outside the configured
    /// base directory.
    #[error("path traversal rejected: {path}")]
    PathTraversal {
        /// The rejected path, as supplied.
        path: String,
    },

    /// A filesystem operation (other than the path-traversal guard above)
    /// failed.
    #[error("filesystem error: {message}")]
    Filesystem {
        /// Detail from the underlying I/O error.
        message: String,
    },
}

impl PregenError {
    /// Create a policy-violation error.
    pub fn policy_violation(message: impl Into<String>) -> Self {
        Self::PolicyViolation { message: message.into() }
    }

    /// Create a path-traversal error.
    pub fn path_traversal(path: impl Into<String>) -> Self {
        Self::PathTraversal { path: path.into() }
    }

    /// Create a filesystem error.
    pub fn filesystem(message: impl Into<String>) -> Self {
        Self::Filesystem { message: message.into() }
    }

    /// Whether retrying the same operation could plausibly succeed.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Database(DbError::Storage { .. }) | Self::Generation(_) | Self::Filesystem { .. })
    }

    /// Whether this error represents an API-level invariant violation.
    #[must_use]
    pub const fn is_policy_violation(&self) -> bool {
        matches!(self, Self::PolicyViolation { .. })
    }

    /// User-facing projection distinct from `Display`.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Database(_) => "A storage error occurred. Please try again.".to_string(),
            Self::Generation(_) => "Speech generation failed. Please try again.".to_string(),
            Self::PolicyViolation { message } => message.clone(),
            Self::PathTraversal { .. } => "The requested path is not allowed.".to_string(),
            Self::Filesystem { message } => format!("A filesystem error occurred: {message}"),
        }
    }
}

/// Convenience result type for `tts-pregen` operations.
pub type PregenResult<T> = Result<T, PregenError>;
