//! Error type for the session layer. The context manager and confidence
//! monitor are pure computation and never fail: a buffer
//! with no content renders empty, and analysis worst-cases to neutral
//! scores rather than raising an error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the session layer's lifecycle and bookkeeping.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum FovError {
    /// A session state transition was attempted that the lifecycle graph
    /// does not permit (e.g. `idle` directly to `ai_speaking`).
    #[error("invalid session transition from {from} to {to}")]
    InvalidTransition {
        /// The state the session was in.
        from: String,
        /// The state the caller attempted to transition to.
        to: String,
    },

    /// A lookup (session id, user id) found no matching row.
    #[error("not found: {what}")]
    NotFound {
        /// Description of what was looked up.
        what: String,
    },
}

impl FovError {
    /// Create an invalid-transition error.
    pub fn invalid_transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::InvalidTransition { from: from.into(), to: to.into() }
    }

    /// Create a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Whether retrying the same operation could plausibly succeed. Both
    /// variants are API-level invariant violations, never transient.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }

    /// Whether this error represents an API-level invariant violation.
    #[must_use]
    pub const fn is_policy_violation(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }

    /// User-facing projection distinct from `Display`.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidTransition { .. } => "That action isn't available right now.".to_string(),
            Self::NotFound { what } => format!("{what} could not be found."),
        }
    }
}

/// Convenience result type for `fov-context` operations.
pub type FovResult<T> = Result<T, FovError>;
