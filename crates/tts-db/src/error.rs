//! Error type for the relational persistence layer backing the pre-gen,
//! profile, and comparison repositories.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the `tts-db` repositories.
///
/// Designed to be serializable and not depend on external error types like
/// `sqlx::Error`, matching the pattern used throughout this workspace: the
/// underlying error is captured as a string at the point it crosses the
/// `tts-db` boundary.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum DbError {
    /// The underlying `SQLite` driver returned an error.
    #[error("database error: {message}")]
    Storage {
        /// Detail from the underlying driver.
        message: String,
    },

    /// A row that was expected to exist could not be found.
    #[error("not found: {what}")]
    NotFound {
        /// Description of what was looked up.
        what: String,
    },

    /// A JSON-valued column failed to (de)serialize.
    #[error("serialization error: {message}")]
    Serialization {
        /// Detail from the serializer.
        message: String,
    },

    /// An API-level invariant was violated before any row was touched
    /// (e.g. both `profile_id` and `tts_config` supplied, a duplicate
    /// profile name, starting a non-pending job).
    #[error("policy violation: {message}")]
    PolicyViolation {
        /// Human-readable description of the violated invariant.
        message: String,
    },
}

impl DbError {
    /// Wrap a `sqlx::Error`.
    #[must_use]
    pub fn storage(err: &sqlx::Error) -> Self {
        Self::Storage { message: err.to_string() }
    }

    /// Create a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into() }
    }

    /// Create a policy-violation error.
    pub fn policy_violation(message: impl Into<String>) -> Self {
        Self::PolicyViolation { message: message.into() }
    }

    /// Whether the failing operation is worth retrying unmodified.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }

    /// Whether this error represents an API-level invariant violation
    /// (as opposed to a transient storage failure).
    #[must_use]
    pub const fn is_policy_violation(&self) -> bool {
        matches!(self, Self::PolicyViolation { .. })
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        Self::storage(&err)
    }
}

/// Convenience result type for `tts-db` operations.
pub type DbResult<T> = Result<T, DbError>;
