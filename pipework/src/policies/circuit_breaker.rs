//! Circuit breaker policy and its explicit state machine.
//!
//! The breaker state lives on the policy object, not on the context or the
//! builder, so its lifecycle is independent of any single pipeline run. The
//! caller chooses sharing scope: one instance per call-site, or one shared
//! instance per protected resource.

use super::{ErrorHandlingPolicy, ErrorPredicate};
use crate::cancellation::CancellationToken;
use crate::context::PipeContext;
use crate::errors::PipeworkError;
use crate::pipes::Pipe;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_OPEN_TIMEOUT_MS: u64 = 60_000;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerState {
    /// Pass-through; consecutive qualifying failures are counted.
    Closed,
    /// Fail fast without invoking the pipe until the open timeout elapses.
    Open,
    /// A single trial invocation decides whether to close or re-open.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

/// The circuit breaker state machine.
///
/// Shared between the policy and strategy flavors. Open state is exited
/// lazily: the transition to half-open happens on the next acquire after
/// the timeout elapses, not via a timer.
#[derive(Debug)]
pub struct BreakerCore {
    failure_threshold: u32,
    open_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl BreakerCore {
    /// Creates a new breaker, coercing non-positive parameters to defaults.
    #[must_use]
    pub fn new(failure_threshold: u32, open_timeout_ms: u64) -> Self {
        let failure_threshold = if failure_threshold == 0 {
            DEFAULT_FAILURE_THRESHOLD
        } else {
            failure_threshold
        };
        let open_timeout_ms = if open_timeout_ms == 0 {
            DEFAULT_OPEN_TIMEOUT_MS
        } else {
            open_timeout_ms
        };

        Self {
            failure_threshold,
            open_timeout: Duration::from_millis(open_timeout_ms),
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure: None,
            }),
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Returns the consecutive failure count since the last reset.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Returns the configured failure threshold.
    #[must_use]
    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Resets the breaker to closed with a zero failure count.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
    }

    /// Asks the breaker to admit a call.
    ///
    /// # Errors
    ///
    /// Returns the remaining open-window milliseconds when the call is
    /// rejected.
    pub fn try_acquire(&self) -> Result<(), u64> {
        let mut inner = self.inner.lock();

        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map_or(self.open_timeout, |at| at.elapsed());

                if elapsed >= self.open_timeout {
                    inner.state = BreakerState::HalfOpen;
                    tracing::debug!("Circuit breaker entering half-open trial");
                    Ok(())
                } else {
                    let remaining = self.open_timeout - elapsed;
                    Err(remaining.as_millis() as u64)
                }
            }
        }
    }

    /// Reports a successful call.
    pub fn on_success(&self) {
        let mut inner = self.inner.lock();

        if inner.state == BreakerState::HalfOpen {
            tracing::debug!("Circuit breaker closing after successful trial");
        }
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
    }

    /// Reports a qualifying failed call.
    pub fn on_failure(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure = Some(Instant::now());

        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                tracing::warn!("Circuit breaker re-opened after failed trial");
            }
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                    tracing::warn!(
                        failures = inner.failure_count,
                        "Circuit breaker opened"
                    );
                }
            }
            BreakerState::Open => {}
        }
    }
}

/// Fails fast once a pipe has failed too many consecutive times.
///
/// An optional predicate selects which errors count against the breaker;
/// excluded errors bypass the counting entirely and propagate directly.
/// Cancellation never counts.
pub struct CircuitBreakerPolicy {
    core: BreakerCore,
    predicate: Option<ErrorPredicate>,
}

impl CircuitBreakerPolicy {
    /// Creates a new circuit breaker policy.
    #[must_use]
    pub fn new(failure_threshold: u32, open_timeout_ms: u64) -> Self {
        Self {
            core: BreakerCore::new(failure_threshold, open_timeout_ms),
            predicate: None,
        }
    }

    /// Sets a predicate deciding whether an error counts against the breaker.
    #[must_use]
    pub fn with_predicate(mut self, predicate: ErrorPredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Returns the underlying state machine.
    #[must_use]
    pub fn core(&self) -> &BreakerCore {
        &self.core
    }

    fn counts(&self, error: &PipeworkError) -> bool {
        if error.is_cancelled() {
            return false;
        }
        self.predicate.as_ref().map_or(true, |p| p(error))
    }
}

impl std::fmt::Debug for CircuitBreakerPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerPolicy")
            .field("core", &self.core)
            .field("has_predicate", &self.predicate.is_some())
            .finish()
    }
}

#[async_trait]
impl ErrorHandlingPolicy for CircuitBreakerPolicy {
    fn name(&self) -> &str {
        "circuit-breaker"
    }

    async fn execute(
        &self,
        pipe: &dyn Pipe,
        ctx: &PipeContext,
        token: &CancellationToken,
    ) -> Result<(), PipeworkError> {
        token.check()?;

        if let Err(remaining_ms) = self.core.try_acquire() {
            return Err(PipeworkError::CircuitOpen {
                pipe: pipe.name().to_string(),
                remaining_ms,
            });
        }

        match pipe.execute(ctx, token).await {
            Ok(()) => {
                self.core.on_success();
                Ok(())
            }
            Err(e) => {
                if self.counts(&e) {
                    self.core.on_failure();
                }
                Err(e)
            }
        }
    }
}
