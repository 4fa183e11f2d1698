//! Error types for the pipework framework.
//!
//! The taxonomy distinguishes failures of pipe logic itself from failures of
//! the orchestration around it (cancellation, configuration, validation) and
//! from resilience wrappers giving up (retry exhaustion, open circuit,
//! exhausted fallback). Errors are `Clone` so they can be recorded into the
//! context's failure log and still propagate to the caller.

use thiserror::Error;

/// The main error type for pipework operations.
#[derive(Debug, Clone, Error)]
pub enum PipeworkError {
    /// A pipe's own logic surfaced an error.
    #[error("Pipe '{pipe}' failed: {message}")]
    PipeFailure {
        /// The pipe that failed.
        pipe: String,
        /// The failure message.
        message: String,
    },

    /// The operation was aborted via a cancellation token.
    #[error("Execution cancelled: {0}")]
    Cancelled(String),

    /// Static resource-dependency validation failed.
    #[error("{0}")]
    Validation(#[from] ValidationFailure),

    /// Builder preconditions were unmet (missing context, source, or steps).
    #[error("Pipeline configuration error: {0}")]
    Configuration(String),

    /// A retry policy exhausted its attempts.
    #[error("Retry exhausted after {attempts} attempts for pipe '{pipe}': {message}")]
    RetryExhausted {
        /// The protected pipe.
        pipe: String,
        /// The number of attempts made.
        attempts: u32,
        /// The final attempt's failure message.
        message: String,
    },

    /// A circuit breaker rejected the call without invoking the pipe.
    #[error("Circuit open for pipe '{pipe}': rejecting calls for another {remaining_ms}ms")]
    CircuitOpen {
        /// The protected pipe.
        pipe: String,
        /// Milliseconds until the breaker will admit a trial call.
        remaining_ms: u64,
    },

    /// A fallback policy's primary and fallback pipes both failed.
    #[error("Fallback exhausted for pipe '{pipe}': primary: {primary}; fallback: {fallback}")]
    FallbackExhausted {
        /// The protected pipe.
        pipe: String,
        /// The primary failure message.
        primary: String,
        /// The fallback failure message (authoritative).
        fallback: String,
    },

    /// A resource-map contract violation.
    #[error("{0}")]
    Resource(#[from] ResourceError),
}

impl PipeworkError {
    /// Creates a pipe failure error.
    #[must_use]
    pub fn pipe_failure(pipe: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PipeFailure {
            pipe: pipe.into(),
            message: message.into(),
        }
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled(reason.into())
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Returns true if this error is a cancellation.
    ///
    /// Cancellation is never swallowed by continue-on-failure handling.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns the name of the pipe this error originated from, if known.
    #[must_use]
    pub fn pipe_name(&self) -> Option<&str> {
        match self {
            Self::PipeFailure { pipe, .. }
            | Self::RetryExhausted { pipe, .. }
            | Self::CircuitOpen { pipe, .. }
            | Self::FallbackExhausted { pipe, .. } => Some(pipe),
            _ => None,
        }
    }
}

/// Errors raised by the context's resource map on contract violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    /// The requested key is absent.
    #[error("Resource not found: '{key}'")]
    NotFound {
        /// The missing key.
        key: String,
    },

    /// The key is already present and duplicate adds are rejected.
    #[error("Resource already exists: '{key}'")]
    AlreadyExists {
        /// The conflicting key.
        key: String,
    },
}

impl ResourceError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates an already-exists error.
    #[must_use]
    pub fn already_exists(key: impl Into<String>) -> Self {
        Self::AlreadyExists { key: key.into() }
    }
}

/// Error raised when the pre-execution resource-dependency scan fails.
#[derive(Debug, Clone, Error)]
#[error("Pipeline validation failed: {}", errors.join("; "))]
pub struct ValidationFailure {
    /// The validation error messages.
    pub errors: Vec<String>,
}

impl ValidationFailure {
    /// Creates a new validation failure.
    #[must_use]
    pub fn new(errors: Vec<String>) -> Self {
        Self { errors }
    }
}
