//! Fallback policy delegating to a secondary pipe on failure.

use super::{ErrorHandlingPolicy, ErrorPredicate};
use crate::cancellation::CancellationToken;
use crate::context::{FailureRecord, PipeContext};
use crate::errors::PipeworkError;
use crate::pipes::Pipe;
use async_trait::async_trait;
use std::sync::Arc;

/// Runs a fallback pipe when the primary pipe fails.
///
/// An optional predicate gates which primary errors are worth falling back
/// on; rejected errors propagate as-is. When both pipes fail, a compound
/// error carrying both messages propagates, with the fallback's message
/// authoritative (last).
pub struct FallbackPolicy {
    fallback: Arc<dyn Pipe>,
    predicate: Option<ErrorPredicate>,
}

impl FallbackPolicy {
    /// Creates a new fallback policy.
    #[must_use]
    pub fn new(fallback: Arc<dyn Pipe>) -> Self {
        Self {
            fallback,
            predicate: None,
        }
    }

    /// Sets a predicate deciding whether a primary error triggers fallback.
    #[must_use]
    pub fn with_predicate(mut self, predicate: ErrorPredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    fn should_fall_back(&self, error: &PipeworkError) -> bool {
        if error.is_cancelled() {
            return false;
        }
        self.predicate.as_ref().map_or(true, |p| p(error))
    }
}

impl std::fmt::Debug for FallbackPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackPolicy")
            .field("fallback", &self.fallback.name())
            .field("has_predicate", &self.predicate.is_some())
            .finish()
    }
}

#[async_trait]
impl ErrorHandlingPolicy for FallbackPolicy {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn execute(
        &self,
        pipe: &dyn Pipe,
        ctx: &PipeContext,
        token: &CancellationToken,
    ) -> Result<(), PipeworkError> {
        token.check()?;

        let primary = match pipe.execute(ctx, token).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        if !self.should_fall_back(&primary) {
            return Err(primary);
        }

        ctx.failures
            .record(FailureRecord::new(primary.to_string()).with_pipe(pipe.name()));
        tracing::debug!(
            pipe = pipe.name(),
            fallback = self.fallback.name(),
            error = %primary,
            "Primary failed, executing fallback"
        );

        match self.fallback.execute(ctx, token).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() => Err(e),
            Err(fallback_err) => Err(PipeworkError::FallbackExhausted {
                pipe: pipe.name().to_string(),
                primary: primary.to_string(),
                fallback: fallback_err.to_string(),
            }),
        }
    }
}
