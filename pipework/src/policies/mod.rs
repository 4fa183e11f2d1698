//! Error-handling policies wrapping a single pipe attempt boundary.
//!
//! A policy decorates one pipe attachment: the step hands it the pipe and
//! the policy decides how many times and under what conditions the pipe
//! actually runs. Provided policies: retry with optional backoff, circuit
//! breaker, and fallback.

mod circuit_breaker;
mod fallback;
mod retry;

pub use circuit_breaker::{BreakerCore, BreakerState, CircuitBreakerPolicy};
pub use fallback::FallbackPolicy;
pub use retry::{BackoffMode, JitterMode, RetryConfig, RetryPolicy};

use crate::cancellation::CancellationToken;
use crate::context::PipeContext;
use crate::errors::PipeworkError;
use crate::pipes::Pipe;
use async_trait::async_trait;
use std::sync::Arc;

/// Predicate over errors used by policies to gate their behavior.
pub type ErrorPredicate = Arc<dyn Fn(&PipeworkError) -> bool + Send + Sync>;

/// Trait for error-handling policies.
///
/// A policy wraps exactly one pipe invocation boundary; whatever it returns
/// is what the owning step sees as the outcome of the pipe.
#[async_trait]
pub trait ErrorHandlingPolicy: Send + Sync {
    /// Returns the policy name for logging and diagnostics.
    fn name(&self) -> &str;

    /// Executes the pipe under this policy.
    async fn execute(
        &self,
        pipe: &dyn Pipe,
        ctx: &PipeContext,
        token: &CancellationToken,
    ) -> Result<(), PipeworkError>;
}
