//! Execution steps: the units the builder schedules.
//!
//! A step owns one slice of the execution plan. The variants form a closed
//! set: sequential, parallel, conditional, and sub-pipeline. Error handling
//! resolves per pipe in a fixed order: an explicit policy wins over an
//! explicit strategy, which wins over the context-wide default strategy,
//! and a bare invocation is the last resort.

use crate::cancellation::CancellationToken;
use crate::context::{FailureRecord, PipeContext};
use crate::errors::PipeworkError;
use crate::pipes::Pipe;
use crate::policies::ErrorHandlingPolicy;
use crate::strategies::ErrorRecoveryStrategy;
use crate::subpipeline::SubPipeline;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-attachment execution configuration for a single pipe.
#[derive(Clone, Default)]
pub struct PipeConfig {
    /// Error-handling policy wrapping this pipe, if any.
    pub policy: Option<Arc<dyn ErrorHandlingPolicy>>,
    /// Recovery strategy wrapping this pipe, if any. Ignored when a policy
    /// is also set.
    pub strategy: Option<Arc<dyn ErrorRecoveryStrategy>>,
    /// Per-pipe continue-on-failure override.
    pub continue_on_failure: Option<bool>,
    /// Advisory timeout hint, carried for observability. Not enforced.
    pub timeout_ms: Option<u64>,
    /// Advisory attempt-count hint, carried for observability.
    pub max_attempts: Option<u32>,
    /// Free-form attachment metadata.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl PipeConfig {
    /// Creates an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the error-handling policy.
    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn ErrorHandlingPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Sets the recovery strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Arc<dyn ErrorRecoveryStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Sets the per-pipe continue-on-failure override.
    #[must_use]
    pub fn with_continue_on_failure(mut self, value: bool) -> Self {
        self.continue_on_failure = Some(value);
        self
    }

    /// Sets the advisory timeout hint.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Sets the advisory attempt-count hint.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Attaches a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

impl std::fmt::Debug for PipeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeConfig")
            .field("policy", &self.policy.as_ref().map(|p| p.name()))
            .field("strategy", &self.strategy.as_ref().map(|s| s.name()))
            .field("continue_on_failure", &self.continue_on_failure)
            .field("timeout_ms", &self.timeout_ms)
            .field("max_attempts", &self.max_attempts)
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// The discriminant of a [`Step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// One pipe, awaited to completion.
    Sequential,
    /// Several pipes started together and joined.
    Parallel,
    /// One pipe, skipped when its predicate says no.
    Conditional,
    /// A nested pipeline run against the same context.
    SubPipeline,
}

/// Predicate deciding at execution time whether a conditional step runs.
pub type StepPredicate = Arc<dyn Fn(&PipeContext) -> bool + Send + Sync>;

/// A unit of the execution plan.
pub enum Step {
    /// A single pipe.
    Sequential {
        /// The pipe to run.
        pipe: Arc<dyn Pipe>,
        /// Its execution configuration.
        config: PipeConfig,
    },
    /// Pipes started together; the step resolves when all have settled.
    Parallel {
        /// The pipes to run concurrently.
        pipes: Vec<Arc<dyn Pipe>>,
        /// One configuration per pipe, index-aligned.
        configs: Vec<PipeConfig>,
    },
    /// A pipe guarded by a runtime predicate.
    Conditional {
        /// The pipe to run when the predicate holds.
        pipe: Arc<dyn Pipe>,
        /// Evaluated against the context just before the step.
        predicate: StepPredicate,
        /// Its execution configuration.
        config: PipeConfig,
    },
    /// A nested pipeline sharing this run's context and token.
    SubPipeline(Box<SubPipeline>),
}

impl Step {
    /// Creates a sequential step.
    #[must_use]
    pub fn sequential(pipe: Arc<dyn Pipe>, config: PipeConfig) -> Self {
        Self::Sequential { pipe, config }
    }

    /// Creates a parallel step.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `pipes` is empty or when
    /// `configs` is non-empty and not index-aligned with `pipes`.
    pub fn parallel(
        pipes: Vec<Arc<dyn Pipe>>,
        configs: Vec<PipeConfig>,
    ) -> Result<Self, PipeworkError> {
        if pipes.is_empty() {
            return Err(PipeworkError::configuration(
                "parallel step requires at least one pipe",
            ));
        }

        let configs = if configs.is_empty() {
            vec![PipeConfig::default(); pipes.len()]
        } else if configs.len() == pipes.len() {
            configs
        } else {
            return Err(PipeworkError::configuration(format!(
                "parallel step has {} pipes but {} configs",
                pipes.len(),
                configs.len()
            )));
        };

        Ok(Self::Parallel { pipes, configs })
    }

    /// Creates a conditional step.
    #[must_use]
    pub fn conditional(pipe: Arc<dyn Pipe>, predicate: StepPredicate, config: PipeConfig) -> Self {
        Self::Conditional {
            pipe,
            predicate,
            config,
        }
    }

    /// Creates a sub-pipeline step.
    #[must_use]
    pub fn sub_pipeline(sub: SubPipeline) -> Self {
        Self::SubPipeline(Box::new(sub))
    }

    /// Returns the step's discriminant.
    #[must_use]
    pub fn kind(&self) -> StepKind {
        match self {
            Self::Sequential { .. } => StepKind::Sequential,
            Self::Parallel { .. } => StepKind::Parallel,
            Self::Conditional { .. } => StepKind::Conditional,
            Self::SubPipeline(_) => StepKind::SubPipeline,
        }
    }

    /// Returns the metrics key for this step at position `index`.
    #[must_use]
    pub fn metric_name(&self, index: usize) -> String {
        let label = match self {
            Self::Sequential { pipe, .. } | Self::Conditional { pipe, .. } => pipe.name(),
            Self::Parallel { .. } => "parallel",
            Self::SubPipeline(sub) => sub.name(),
        };
        format!("step_{}_{}", index + 1, label)
    }

    /// Returns every pipe reachable from this step, sub-pipelines included.
    ///
    /// Used by validators, which see the whole manifest regardless of
    /// nesting or conditions.
    #[must_use]
    pub fn pipes(&self) -> Vec<Arc<dyn Pipe>> {
        match self {
            Self::Sequential { pipe, .. } | Self::Conditional { pipe, .. } => {
                vec![pipe.clone()]
            }
            Self::Parallel { pipes, .. } => pipes.clone(),
            Self::SubPipeline(sub) => sub.pipes(),
        }
    }

    /// Executes the step against the shared context.
    pub async fn execute(
        &self,
        ctx: &Arc<PipeContext>,
        token: &CancellationToken,
    ) -> Result<(), PipeworkError> {
        match self {
            Self::Sequential { pipe, config } => {
                let result = run_pipe(pipe.as_ref(), config, ctx, token).await;
                settle(result, pipe.name(), config, ctx)
            }
            Self::Parallel { pipes, configs } => {
                let branches = pipes
                    .iter()
                    .zip(configs.iter())
                    .map(|(pipe, config)| async move {
                        let result = run_pipe(pipe.as_ref(), config, ctx, token).await;
                        settle(result, pipe.name(), config, ctx)
                    });
                let outcomes = join_all(branches).await;

                // Cancellation outranks ordinary failures; otherwise the
                // first non-swallowed error in attachment order wins.
                if let Some(cancelled) = outcomes
                    .iter()
                    .find_map(|r| r.as_ref().err().filter(|e| e.is_cancelled()))
                {
                    return Err(cancelled.clone());
                }
                outcomes.into_iter().collect()
            }
            Self::Conditional {
                pipe,
                predicate,
                config,
            } => {
                if !predicate(ctx) {
                    tracing::debug!(pipe = pipe.name(), "Condition false, skipping pipe");
                    return Ok(());
                }
                let result = run_pipe(pipe.as_ref(), config, ctx, token).await;
                settle(result, pipe.name(), config, ctx)
            }
            Self::SubPipeline(sub) => {
                let result = sub.execute(ctx, token).await;
                match result {
                    Ok(()) => Ok(()),
                    Err(e) if e.is_cancelled() => Err(e),
                    Err(e) if ctx.effective_continue_on_failure() => {
                        tracing::warn!(
                            sub_pipeline = sub.name(),
                            error = %e,
                            "Sub-pipeline failed, continuing"
                        );
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequential { pipe, config } => f
                .debug_struct("Sequential")
                .field("pipe", &pipe.name())
                .field("config", config)
                .finish(),
            Self::Parallel { pipes, .. } => f
                .debug_struct("Parallel")
                .field("pipes", &pipes.iter().map(|p| p.name()).collect::<Vec<_>>())
                .finish(),
            Self::Conditional { pipe, config, .. } => f
                .debug_struct("Conditional")
                .field("pipe", &pipe.name())
                .field("config", config)
                .finish(),
            Self::SubPipeline(sub) => f
                .debug_struct("SubPipeline")
                .field("name", &sub.name())
                .finish(),
        }
    }
}

/// Runs one pipe through its resolved error-handling layer.
async fn run_pipe(
    pipe: &dyn Pipe,
    config: &PipeConfig,
    ctx: &PipeContext,
    token: &CancellationToken,
) -> Result<(), PipeworkError> {
    token.check()?;

    if let Some(policy) = &config.policy {
        return policy.execute(pipe, ctx, token).await;
    }
    if let Some(strategy) = &config.strategy {
        return strategy.execute(pipe, ctx, token).await;
    }
    if let Some(strategy) = ctx.error_options().and_then(|o| o.default_strategy) {
        return strategy.execute(pipe, ctx, token).await;
    }
    pipe.execute(ctx, token).await
}

/// Records a terminal failure and decides whether it is swallowed.
///
/// Cancellation is never swallowed. For anything else the per-pipe override
/// wins, then the context-wide default.
fn settle(
    result: Result<(), PipeworkError>,
    pipe_name: &str,
    config: &PipeConfig,
    ctx: &PipeContext,
) -> Result<(), PipeworkError> {
    let error = match result {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };

    ctx.failures
        .record(FailureRecord::new(error.to_string()).with_pipe(pipe_name));

    if error.is_cancelled() {
        return Err(error);
    }

    let swallow = config
        .continue_on_failure
        .unwrap_or_else(|| ctx.effective_continue_on_failure());

    if swallow {
        tracing::warn!(pipe = pipe_name, error = %error, "Pipe failed, continuing");
        Ok(())
    } else {
        Err(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::{AddPipe, FailingPipe, SlowPipe};
    use std::time::Instant;

    fn arc_pipe(pipe: impl Pipe + 'static) -> Arc<dyn Pipe> {
        Arc::new(pipe)
    }

    #[tokio::test]
    async fn test_sequential_step_runs_pipe() {
        let step = Step::sequential(arc_pipe(AddPipe::new("add", 5)), PipeConfig::new());
        let ctx = Arc::new(PipeContext::new());
        let token = CancellationToken::new();

        step.execute(&ctx, &token).await.unwrap();
        assert_eq!(ctx.output()["result"], serde_json::json!(5));
    }

    #[tokio::test]
    async fn test_sequential_failure_recorded_and_propagated() {
        let step = Step::sequential(
            arc_pipe(FailingPipe::new("broken", "boom")),
            PipeConfig::new(),
        );
        let ctx = Arc::new(PipeContext::new());
        let token = CancellationToken::new();

        let err = step.execute(&ctx, &token).await.unwrap_err();
        assert!(matches!(err, PipeworkError::PipeFailure { .. }));
        assert_eq!(ctx.failures.len(), 1);
        assert_eq!(ctx.failures.last().unwrap().pipe, Some("broken".to_string()));
    }

    #[tokio::test]
    async fn test_per_pipe_continue_on_failure_swallows() {
        let step = Step::sequential(
            arc_pipe(FailingPipe::new("broken", "boom")),
            PipeConfig::new().with_continue_on_failure(true),
        );
        let ctx = Arc::new(PipeContext::new());
        let token = CancellationToken::new();

        step.execute(&ctx, &token).await.unwrap();
        // Swallowed, but still on record.
        assert_eq!(ctx.failures.len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_is_never_swallowed() {
        let step = Step::sequential(
            arc_pipe(SlowPipe::new("slow", 5_000)),
            PipeConfig::new().with_continue_on_failure(true),
        );
        let ctx = Arc::new(PipeContext::new());
        let token = CancellationToken::new();
        token.cancel("shutdown");

        let err = step.execute(&ctx, &token).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_parallel_rejects_empty_and_misaligned() {
        let err = Step::parallel(Vec::new(), Vec::new()).unwrap_err();
        assert!(matches!(err, PipeworkError::Configuration(_)));

        let err = Step::parallel(
            vec![arc_pipe(AddPipe::new("a", 1))],
            vec![PipeConfig::new(), PipeConfig::new()],
        )
        .unwrap_err();
        assert!(matches!(err, PipeworkError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_parallel_overlaps_execution() {
        let step = Step::parallel(
            vec![
                arc_pipe(SlowPipe::new("a", 50)),
                arc_pipe(SlowPipe::new("b", 50)),
                arc_pipe(SlowPipe::new("c", 50)),
            ],
            Vec::new(),
        )
        .unwrap();
        let ctx = Arc::new(PipeContext::new());
        let token = CancellationToken::new();

        let started = Instant::now();
        step.execute(&ctx, &token).await.unwrap();

        // Three 50ms pipes overlapped; well under the 150ms serial total.
        assert!(started.elapsed().as_millis() < 140);
    }

    #[tokio::test]
    async fn test_parallel_waits_for_all_despite_failure() {
        let slow = Arc::new(SlowPipe::new("slow", 40));
        let step = Step::parallel(
            vec![
                arc_pipe(FailingPipe::new("fast-fail", "boom")),
                slow.clone() as Arc<dyn Pipe>,
            ],
            Vec::new(),
        )
        .unwrap();
        let ctx = Arc::new(PipeContext::new());
        let token = CancellationToken::new();

        let started = Instant::now();
        let err = step.execute(&ctx, &token).await.unwrap_err();

        assert!(matches!(err, PipeworkError::PipeFailure { .. }));
        // The failing branch did not short-circuit the slow one.
        assert!(started.elapsed().as_millis() >= 40);
        assert_eq!(slow.call_count(), 1);
    }

    #[tokio::test]
    async fn test_parallel_first_error_in_order_wins() {
        let step = Step::parallel(
            vec![
                arc_pipe(FailingPipe::new("first", "error one")),
                arc_pipe(FailingPipe::new("second", "error two")),
            ],
            Vec::new(),
        )
        .unwrap();
        let ctx = Arc::new(PipeContext::new());
        let token = CancellationToken::new();

        let err = step.execute(&ctx, &token).await.unwrap_err();
        assert_eq!(err.pipe_name(), Some("first"));
        // Both failures were recorded.
        assert_eq!(ctx.failures.len(), 2);
    }

    #[tokio::test]
    async fn test_parallel_per_branch_swallowing() {
        let step = Step::parallel(
            vec![
                arc_pipe(FailingPipe::new("tolerated", "boom")),
                arc_pipe(AddPipe::new("add", 3)),
            ],
            vec![
                PipeConfig::new().with_continue_on_failure(true),
                PipeConfig::new(),
            ],
        )
        .unwrap();
        let ctx = Arc::new(PipeContext::new());
        let token = CancellationToken::new();

        step.execute(&ctx, &token).await.unwrap();
        assert_eq!(ctx.output()["result"], serde_json::json!(3));
    }

    #[tokio::test]
    async fn test_conditional_skips_when_false() {
        let step = Step::conditional(
            arc_pipe(AddPipe::new("add", 5)),
            Arc::new(|_ctx: &PipeContext| false),
            PipeConfig::new(),
        );
        let ctx = Arc::new(PipeContext::new());
        let token = CancellationToken::new();

        step.execute(&ctx, &token).await.unwrap();
        assert_eq!(ctx.output(), serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_conditional_runs_when_true() {
        let step = Step::conditional(
            arc_pipe(AddPipe::new("add", 5)),
            Arc::new(|ctx: &PipeContext| ctx.input()["enabled"] == serde_json::json!(true)),
            PipeConfig::new(),
        );
        let ctx = Arc::new(PipeContext::new());
        ctx.bind_input(serde_json::json!({"enabled": true}));
        let token = CancellationToken::new();

        step.execute(&ctx, &token).await.unwrap();
        assert_eq!(ctx.output()["result"], serde_json::json!(5));
    }

    #[test]
    fn test_metric_names() {
        let seq = Step::sequential(arc_pipe(AddPipe::new("add", 1)), PipeConfig::new());
        assert_eq!(seq.metric_name(0), "step_1_add");

        let par = Step::parallel(vec![arc_pipe(AddPipe::new("a", 1))], Vec::new()).unwrap();
        assert_eq!(par.metric_name(2), "step_3_parallel");
    }
}
