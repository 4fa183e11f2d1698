//! Retry policy with configurable backoff and optional jitter.

use super::{ErrorHandlingPolicy, ErrorPredicate};
use crate::cancellation::{sleep_cancellable, CancellationToken};
use crate::context::{FailureRecord, PipeContext};
use crate::errors::PipeworkError;
use crate::pipes::Pipe;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 1000;
const DEFAULT_MAX_DELAY_MS: u64 = 60_000;

/// Backoff mode for inter-attempt delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackoffMode {
    /// delay = base (constant)
    #[default]
    Fixed,
    /// delay = base * 2^(attempt-1), capped at the max delay
    Exponential,
}

/// Jitter mode applied on top of the computed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JitterMode {
    /// No jitter (deterministic delays).
    #[default]
    None,
    /// Random from 0 to delay.
    Full,
    /// Half fixed, half random.
    Equal,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, including the initial one.
    pub max_attempts: u32,
    /// Base delay between attempts in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff mode.
    pub backoff: BackoffMode,
    /// Jitter mode.
    pub jitter: JitterMode,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            backoff: BackoffMode::default(),
            jitter: JitterMode::default(),
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff mode.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffMode) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the jitter mode.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterMode) -> Self {
        self.jitter = jitter;
        self
    }

    /// Coerces non-positive values back to the documented defaults.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.max_attempts == 0 {
            self.max_attempts = DEFAULT_MAX_ATTEMPTS;
        }
        if self.base_delay_ms == 0 {
            self.base_delay_ms = DEFAULT_BASE_DELAY_MS;
        }
        if self.max_delay_ms == 0 {
            self.max_delay_ms = DEFAULT_MAX_DELAY_MS;
        }
        self
    }

    /// Computes the delay before the attempt after `attempt` (1-indexed).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms;
        let delay = match self.backoff {
            BackoffMode::Fixed => base,
            BackoffMode::Exponential => base
                .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
                .min(self.max_delay_ms),
        };

        let jittered = match self.jitter {
            JitterMode::None => delay,
            JitterMode::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterMode::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}

/// Retries a pipe up to `max_attempts` times with configurable backoff.
///
/// An optional predicate limits which errors are worth retrying; errors it
/// rejects propagate immediately. Every failed attempt is recorded into the
/// context's failure log with its attempt number.
pub struct RetryPolicy {
    config: RetryConfig,
    predicate: Option<ErrorPredicate>,
}

impl RetryPolicy {
    /// Creates a retry policy from a config, coercing invalid values.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config: config.normalized(),
            predicate: None,
        }
    }

    /// Sets a predicate deciding whether an error should be retried.
    #[must_use]
    pub fn with_predicate(mut self, predicate: ErrorPredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Returns the effective (normalized) configuration.
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn should_retry(&self, error: &PipeworkError) -> bool {
        self.predicate.as_ref().map_or(true, |p| p(error))
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .field("has_predicate", &self.predicate.is_some())
            .finish()
    }
}

#[async_trait]
impl ErrorHandlingPolicy for RetryPolicy {
    fn name(&self) -> &str {
        "retry"
    }

    async fn execute(
        &self,
        pipe: &dyn Pipe,
        ctx: &PipeContext,
        token: &CancellationToken,
    ) -> Result<(), PipeworkError> {
        let mut attempt = 1u32;

        loop {
            token.check()?;

            match pipe.execute(ctx, token).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    ctx.failures.record(
                        FailureRecord::new(e.to_string())
                            .with_pipe(pipe.name())
                            .with_attempt(attempt),
                    );

                    if !self.should_retry(&e) {
                        tracing::debug!(
                            pipe = pipe.name(),
                            error = %e,
                            "Error rejected by retry predicate, propagating"
                        );
                        return Err(e);
                    }

                    if attempt >= self.config.max_attempts {
                        return Err(PipeworkError::RetryExhausted {
                            pipe: pipe.name().to_string(),
                            attempts: attempt,
                            message: e.to_string(),
                        });
                    }

                    let delay = self.config.delay_for(attempt);
                    tracing::debug!(
                        pipe = pipe.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after error"
                    );
                    sleep_cancellable(delay, token).await?;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::{FailingPipe, FlakyPipe};
    use std::sync::Arc;

    #[test]
    fn test_config_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.max_delay_ms, 60_000);
        assert_eq!(config.backoff, BackoffMode::Fixed);
        assert_eq!(config.jitter, JitterMode::None);
    }

    #[test]
    fn test_config_normalization_coerces_zeroes() {
        let config = RetryConfig::new()
            .with_max_attempts(0)
            .with_base_delay_ms(0)
            .with_max_delay_ms(0)
            .normalized();

        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.max_delay_ms, 60_000);
    }

    #[test]
    fn test_delay_fixed() {
        let config = RetryConfig::new().with_base_delay_ms(100);

        assert_eq!(config.delay_for(1), Duration::from_millis(100));
        assert_eq!(config.delay_for(5), Duration::from_millis(100));
    }

    #[test]
    fn test_delay_exponential() {
        let config = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffMode::Exponential);

        assert_eq!(config.delay_for(1), Duration::from_millis(100));
        assert_eq!(config.delay_for(2), Duration::from_millis(200));
        assert_eq!(config.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_exponential_capped() {
        let config = RetryConfig::new()
            .with_base_delay_ms(1000)
            .with_max_delay_ms(5000)
            .with_backoff(BackoffMode::Exponential);

        assert_eq!(config.delay_for(10), Duration::from_millis(5000));
    }

    #[test]
    fn test_delay_full_jitter_bounded() {
        let config = RetryConfig::new()
            .with_base_delay_ms(100)
            .with_jitter(JitterMode::Full);

        for _ in 0..20 {
            assert!(config.delay_for(1) <= Duration::from_millis(100));
        }
    }

    #[tokio::test]
    async fn test_retry_exhausts_and_counts_attempts() {
        let pipe = FailingPipe::new("always", "boom");
        let ctx = PipeContext::new();
        let token = CancellationToken::new();
        let policy = RetryPolicy::new(
            RetryConfig::new().with_max_attempts(3).with_base_delay_ms(1),
        );

        let err = policy.execute(&pipe, &ctx, &token).await.unwrap_err();

        assert!(matches!(
            err,
            PipeworkError::RetryExhausted { attempts: 3, .. }
        ));
        assert_eq!(pipe.call_count(), 3);

        // Each attempt is in the detailed log with its number.
        let records = ctx.failures.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].attempt, Some(1));
        assert_eq!(records[2].attempt, Some(3));
    }

    #[tokio::test]
    async fn test_retry_recovers_on_later_attempt() {
        let pipe = FlakyPipe::new("flaky", 2);
        let ctx = PipeContext::new();
        let token = CancellationToken::new();
        let policy = RetryPolicy::new(
            RetryConfig::new().with_max_attempts(5).with_base_delay_ms(1),
        );

        policy.execute(&pipe, &ctx, &token).await.unwrap();
        assert_eq!(pipe.call_count(), 3);
    }

    #[tokio::test]
    async fn test_predicate_blocks_retry() {
        let pipe = FailingPipe::new("fatal", "unrecoverable");
        let ctx = PipeContext::new();
        let token = CancellationToken::new();
        let policy = RetryPolicy::new(
            RetryConfig::new().with_max_attempts(5).with_base_delay_ms(1),
        )
        .with_predicate(Arc::new(|e| !e.to_string().contains("unrecoverable")));

        let err = policy.execute(&pipe, &ctx, &token).await.unwrap_err();

        assert!(matches!(err, PipeworkError::PipeFailure { .. }));
        assert_eq!(pipe.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_retry_loop() {
        let pipe = FailingPipe::new("always", "boom");
        let ctx = PipeContext::new();
        let token = CancellationToken::new();
        let policy = RetryPolicy::new(
            RetryConfig::new()
                .with_max_attempts(100)
                .with_base_delay_ms(10_000),
        );

        let handle = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                token.cancel("stop retrying");
            })
        };

        let err = policy.execute(&pipe, &ctx, &token).await.unwrap_err();
        handle.await.unwrap();

        assert!(err.is_cancelled());
        assert_eq!(pipe.call_count(), 1);
    }
}
