//! Error-recovery strategies.
//!
//! Strategies share the policy wrapping contract but are meant to be
//! attachable as a pipeline-wide default (or per pipe). A step prefers a
//! per-pipe policy over a strategy when a configuration sets both.
//! Strategy state (the circuit breaker's, in particular) belongs to the
//! strategy object itself; sharing one instance across pipelines shares the
//! state deliberately.

use crate::cancellation::CancellationToken;
use crate::context::PipeContext;
use crate::errors::PipeworkError;
use crate::pipes::Pipe;
use crate::policies::{
    BackoffMode, CircuitBreakerPolicy, ErrorHandlingPolicy, ErrorPredicate, RetryConfig,
    RetryPolicy,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Trait for error-recovery strategies.
///
/// Identical wrapping contract to [`ErrorHandlingPolicy`]; the split exists
/// so callers can register a reusable pipeline-scoped default without
/// conflating it with per-attachment policies.
#[async_trait]
pub trait ErrorRecoveryStrategy: Send + Sync {
    /// Returns the strategy name for logging and diagnostics.
    fn name(&self) -> &str;

    /// Executes the pipe under this strategy.
    async fn execute(
        &self,
        pipe: &dyn Pipe,
        ctx: &PipeContext,
        token: &CancellationToken,
    ) -> Result<(), PipeworkError>;
}

/// Retry with exponential backoff, offered as a reusable strategy.
///
/// Always exponential; there is no flat-delay mode in the strategy flavor.
pub struct RetryWithBackoffStrategy {
    inner: RetryPolicy,
}

impl RetryWithBackoffStrategy {
    /// Creates a new strategy, coercing non-positive parameters to defaults.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        let config = RetryConfig::new()
            .with_max_attempts(max_attempts)
            .with_base_delay_ms(base_delay_ms)
            .with_max_delay_ms(max_delay_ms)
            .with_backoff(BackoffMode::Exponential);

        Self {
            inner: RetryPolicy::new(config),
        }
    }

    /// Sets a predicate deciding whether an error should be retried.
    #[must_use]
    pub fn with_predicate(mut self, predicate: ErrorPredicate) -> Self {
        self.inner = self.inner.with_predicate(predicate);
        self
    }

    /// Returns the effective retry configuration.
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        self.inner.config()
    }
}

impl std::fmt::Debug for RetryWithBackoffStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryWithBackoffStrategy")
            .field("config", self.inner.config())
            .finish()
    }
}

#[async_trait]
impl ErrorRecoveryStrategy for RetryWithBackoffStrategy {
    fn name(&self) -> &str {
        "retry-with-backoff"
    }

    async fn execute(
        &self,
        pipe: &dyn Pipe,
        ctx: &PipeContext,
        token: &CancellationToken,
    ) -> Result<(), PipeworkError> {
        self.inner.execute(pipe, ctx, token).await
    }
}

/// Circuit breaker offered as a reusable strategy.
///
/// Same state machine as [`CircuitBreakerPolicy`]; the breaker state lives
/// on this object for as long as the caller keeps it alive.
pub struct CircuitBreakerStrategy {
    inner: CircuitBreakerPolicy,
}

impl CircuitBreakerStrategy {
    /// Creates a new strategy, coercing non-positive parameters to defaults.
    #[must_use]
    pub fn new(failure_threshold: u32, open_timeout_ms: u64) -> Self {
        Self {
            inner: CircuitBreakerPolicy::new(failure_threshold, open_timeout_ms),
        }
    }

    /// Sets a predicate deciding whether an error counts against the breaker.
    #[must_use]
    pub fn with_predicate(mut self, predicate: ErrorPredicate) -> Self {
        self.inner = self.inner.with_predicate(predicate);
        self
    }

    /// Returns the underlying breaker state machine.
    #[must_use]
    pub fn core(&self) -> &crate::policies::BreakerCore {
        self.inner.core()
    }
}

impl std::fmt::Debug for CircuitBreakerStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerStrategy")
            .field("inner", &self.inner)
            .finish()
    }
}

#[async_trait]
impl ErrorRecoveryStrategy for CircuitBreakerStrategy {
    fn name(&self) -> &str {
        "circuit-breaker"
    }

    async fn execute(
        &self,
        pipe: &dyn Pipe,
        ctx: &PipeContext,
        token: &CancellationToken,
    ) -> Result<(), PipeworkError> {
        self.inner.execute(pipe, ctx, token).await
    }
}

/// Pipeline-wide error-handling defaults, stored on the context.
#[derive(Clone, Default)]
pub struct ErrorHandlingOptions {
    /// Default recovery strategy applied to pipes with no policy or
    /// strategy of their own.
    pub default_strategy: Option<Arc<dyn ErrorRecoveryStrategy>>,
    /// Pipeline-default continue-on-failure override.
    pub continue_on_failure: Option<bool>,
}

impl ErrorHandlingOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default recovery strategy.
    #[must_use]
    pub fn with_default_strategy(mut self, strategy: Arc<dyn ErrorRecoveryStrategy>) -> Self {
        self.default_strategy = Some(strategy);
        self
    }

    /// Sets the continue-on-failure override.
    #[must_use]
    pub fn with_continue_on_failure(mut self, value: bool) -> Self {
        self.continue_on_failure = Some(value);
        self
    }
}

impl std::fmt::Debug for ErrorHandlingOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorHandlingOptions")
            .field(
                "default_strategy",
                &self.default_strategy.as_ref().map(|s| s.name()),
            )
            .field("continue_on_failure", &self.continue_on_failure)
            .finish()
    }
}
