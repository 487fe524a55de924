//! Error type for the TTS resource pool.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while dispatching a synthesis request through the pool.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum PoolError {
    /// No server URL is configured for the requested provider.
    #[error("no TTS server configured for provider '{provider}'")]
    UnconfiguredProvider {
        /// The provider that has no configured upstream URL.
        provider: String,
    },

    /// The upstream server returned a non-200 response.
    #[error("TTS server returned {status}: {body}")]
    UpstreamStatus {
        /// HTTP status code returned by the upstream server.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The HTTP request to the upstream server could not be completed.
    #[error("TTS server connection failed: {message}")]
    Connection {
        /// Detail from the underlying HTTP client.
        message: String,
    },

    /// The request timed out waiting for the upstream server.
    #[error("TTS request timed out after {seconds}s")]
    Timeout {
        /// Configured timeout that was exceeded.
        seconds: f64,
    },
}

impl PoolError {
    /// Create an unconfigured-provider error.
    pub fn unconfigured_provider(provider: impl Into<String>) -> Self {
        Self::UnconfiguredProvider { provider: provider.into() }
    }

    /// Create an upstream-status error.
    pub fn upstream_status(status: u16, body: impl Into<String>) -> Self {
        Self::UpstreamStatus { status, body: body.into() }
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Whether retrying the same request might succeed.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. } | Self::UpstreamStatus { .. })
    }
}

/// Convenience result type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;
