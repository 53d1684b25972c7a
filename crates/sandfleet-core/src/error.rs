//! Error types for sandfleet-core.

use serde::Serialize;
use thiserror::Error;

/// A batch request that was rejected before any runtime call was made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The batch asked for zero sandboxes.
    #[error("count must be >= 1")]
    ZeroCount,

    /// The naming prefix was empty.
    #[error("name prefix must not be empty")]
    EmptyPrefix,

    /// The naming prefix cannot form a valid sandbox name.
    #[error("invalid name prefix {prefix:?}: {reason}")]
    InvalidPrefix {
        /// The rejected prefix
        prefix: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// The concurrency limit was zero.
    #[error("concurrency limit must be >= 1")]
    ZeroConcurrency,

    /// The workload has no image reference.
    #[error("workload image must not be empty")]
    EmptyImage,

    /// The workload has no command to run.
    #[error("workload command must not be empty")]
    EmptyCommand,
}

/// Errors reported by a [`RuntimeClient`](crate::RuntimeClient).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// A sandbox with this name already exists.
    #[error("name already in use: {0}")]
    NameConflict(String),

    /// Likely to succeed on retry (network blip, timeout, rate limit).
    #[error("transient runtime error: {0}")]
    Transient(String),

    /// Will not succeed without changing the request.
    #[error("permanent runtime error: {0}")]
    Permanent(String),

    /// The named sandbox does not exist.
    #[error("sandbox not found: {0}")]
    NotFound(String),
}

impl RuntimeError {
    /// Check if this error is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RuntimeError::Transient(_))
    }

    /// Check if this error indicates a not-found condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }
}

/// Coarse classification of a [`SandboxError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Rejected by the runtime; not retried.
    Permanent,
    /// Transient failures outlasted the retry budget.
    RetriesExhausted,
    /// The batch was cancelled before this sandbox finished.
    Cancelled,
    /// The worker for this sandbox died without reporting.
    Internal,
}

/// Terminal failure attached to a failed sandbox outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SandboxError {
    /// The runtime rejected the create call.
    #[error("{message}")]
    Permanent {
        /// Runtime error message
        message: String,
    },

    /// Every attempt failed with a transient error.
    #[error("retries exhausted after {attempts} attempt(s): {last_error}")]
    RetriesExhausted {
        /// Number of create calls made
        attempts: u32,
        /// The last transient error seen
        last_error: String,
    },

    /// The batch was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// The worker task failed unexpectedly.
    #[error("internal error: {message}")]
    Internal {
        /// What went wrong
        message: String,
    },
}

impl SandboxError {
    /// Get the coarse error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Permanent { .. } => ErrorKind::Permanent,
            Self::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }
}

impl From<RuntimeError> for SandboxError {
    fn from(err: RuntimeError) -> Self {
        SandboxError::Permanent {
            message: err.to_string(),
        }
    }
}
