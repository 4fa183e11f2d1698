//! The fluent pipeline builder and its execution loop.

use crate::cancellation::CancellationToken;
use crate::context::{FailureRecord, PipeContext};
use crate::errors::{PipeworkError, ValidationFailure};
use crate::pipes::Pipe;
use crate::policies::{
    CircuitBreakerPolicy, ErrorHandlingPolicy, FallbackPolicy, RetryConfig, RetryPolicy,
};
use crate::steps::{PipeConfig, Step, StepPredicate};
use crate::strategies::{
    CircuitBreakerStrategy, ErrorHandlingOptions, ErrorRecoveryStrategy, RetryWithBackoffStrategy,
};
use crate::subpipeline::SubPipeline;
use crate::validation::{ResourceDependencyValidator, ValidationReport, Validator};
use std::sync::Arc;
use std::time::Instant;

/// Fluent builder assembling and running a pipeline.
///
/// Attachment order is execution order. The `with_*` modifiers configure
/// the most recently attached step, so a typical chain reads as pipe,
/// modifiers, pipe, modifiers. The builder never swallows step errors
/// itself; tolerance is decided inside the steps.
pub struct PipelineBuilder {
    name: String,
    context: Option<Arc<PipeContext>>,
    source: Option<serde_json::Value>,
    steps: Vec<Step>,
    validator: Option<Arc<dyn Validator>>,
    metrics_enabled: bool,
    default_options: Option<ErrorHandlingOptions>,
}

impl PipelineBuilder {
    /// Creates a new builder for a named pipeline.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context: None,
            source: None,
            steps: Vec::new(),
            validator: None,
            metrics_enabled: false,
            default_options: None,
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the attached steps.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Attaches the shared execution context.
    #[must_use]
    pub fn attach_context(mut self, ctx: Arc<PipeContext>) -> Self {
        self.context = Some(ctx);
        self
    }

    /// Binds the source input for the run.
    #[must_use]
    pub fn set_source(mut self, source: serde_json::Value) -> Self {
        self.source = Some(source);
        self
    }

    /// Attaches a pipe as a sequential step.
    #[must_use]
    pub fn attach_pipe(self, pipe: Arc<dyn Pipe>) -> Self {
        self.attach_pipe_with_config(pipe, PipeConfig::new())
    }

    /// Attaches a pipe as a sequential step with an explicit configuration.
    #[must_use]
    pub fn attach_pipe_with_config(mut self, pipe: Arc<dyn Pipe>, config: PipeConfig) -> Self {
        self.steps.push(Step::sequential(pipe, config));
        self
    }

    /// Attaches a pipe guarded by a runtime predicate.
    #[must_use]
    pub fn attach_conditional(mut self, pipe: Arc<dyn Pipe>, predicate: StepPredicate) -> Self {
        self.steps
            .push(Step::conditional(pipe, predicate, PipeConfig::new()));
        self
    }

    /// Attaches a group of pipes that run concurrently as one step.
    ///
    /// An empty group is accepted here and rejected at validation time.
    #[must_use]
    pub fn attach_parallel(mut self, pipes: Vec<Arc<dyn Pipe>>) -> Self {
        let configs = vec![PipeConfig::new(); pipes.len()];
        self.steps.push(Step::Parallel { pipes, configs });
        self
    }

    /// Attaches a concurrent group with one configuration per pipe.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the group is empty or the
    /// configurations are not index-aligned with the pipes.
    pub fn attach_parallel_with_configs(
        mut self,
        pipes: Vec<Arc<dyn Pipe>>,
        configs: Vec<PipeConfig>,
    ) -> Result<Self, PipeworkError> {
        self.steps.push(Step::parallel(pipes, configs)?);
        Ok(self)
    }

    /// Attaches a nested pipeline as a single step.
    #[must_use]
    pub fn attach_sub_pipeline(mut self, sub: SubPipeline) -> Self {
        self.steps.push(Step::sub_pipeline(sub));
        self
    }

    /// Wraps the most recently attached step in an error-handling policy.
    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn ErrorHandlingPolicy>) -> Self {
        self.configure_last(|config| config.policy = Some(policy.clone()));
        self
    }

    /// Wraps the most recently attached step in a retry policy.
    #[must_use]
    pub fn with_retry_policy(self, config: RetryConfig) -> Self {
        self.with_policy(Arc::new(RetryPolicy::new(config)))
    }

    /// Wraps the most recently attached step in a circuit breaker policy.
    #[must_use]
    pub fn with_circuit_breaker_policy(self, failure_threshold: u32, open_timeout_ms: u64) -> Self {
        self.with_policy(Arc::new(CircuitBreakerPolicy::new(
            failure_threshold,
            open_timeout_ms,
        )))
    }

    /// Wraps the most recently attached step in a fallback policy.
    #[must_use]
    pub fn with_fallback_policy(self, fallback: Arc<dyn Pipe>) -> Self {
        self.with_policy(Arc::new(FallbackPolicy::new(fallback)))
    }

    /// Sets the pipeline-wide default recovery strategy, applied to every
    /// pipe with no policy or strategy of its own.
    ///
    /// Folded into the error-handling options stored on the context at run
    /// time; a continue-on-failure default set via
    /// [`Self::with_error_handling_options`] survives.
    #[must_use]
    pub fn with_recovery_strategy(mut self, strategy: Arc<dyn ErrorRecoveryStrategy>) -> Self {
        let options = self.default_options.take().unwrap_or_default();
        self.default_options = Some(options.with_default_strategy(strategy));
        self
    }

    /// Wraps the most recently attached step in a retry-with-backoff
    /// strategy.
    #[must_use]
    pub fn with_retry_strategy(
        self,
        max_attempts: u32,
        base_delay_ms: u64,
        max_delay_ms: u64,
    ) -> Self {
        self.with_step_strategy(Arc::new(RetryWithBackoffStrategy::new(
            max_attempts,
            base_delay_ms,
            max_delay_ms,
        )))
    }

    /// Wraps the most recently attached step in a circuit breaker strategy.
    #[must_use]
    pub fn with_circuit_breaker_strategy(
        self,
        failure_threshold: u32,
        open_timeout_ms: u64,
    ) -> Self {
        self.with_step_strategy(Arc::new(CircuitBreakerStrategy::new(
            failure_threshold,
            open_timeout_ms,
        )))
    }

    fn with_step_strategy(mut self, strategy: Arc<dyn ErrorRecoveryStrategy>) -> Self {
        self.configure_last(|config| config.strategy = Some(strategy.clone()));
        self
    }

    /// Sets the continue-on-failure override for the most recently attached
    /// step.
    #[must_use]
    pub fn with_continue_on_failure(mut self, value: bool) -> Self {
        self.configure_last(|config| config.continue_on_failure = Some(value));
        self
    }

    /// Sets pipeline-wide error-handling defaults, applied to the context
    /// at run time.
    #[must_use]
    pub fn with_error_handling_options(mut self, options: ErrorHandlingOptions) -> Self {
        self.default_options = Some(options);
        self
    }

    /// Attaches a configuration validator, run before execution.
    #[must_use]
    pub fn attach_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Enables performance metrics collection for runs of this pipeline.
    #[must_use]
    pub fn enable_performance_metrics(mut self) -> Self {
        self.metrics_enabled = true;
        self
    }

    /// Disables performance metrics collection.
    #[must_use]
    pub fn disable_performance_metrics(mut self) -> Self {
        self.metrics_enabled = false;
        self
    }

    /// Returns every pipe reachable from the attached steps, sub-pipelines
    /// included.
    #[must_use]
    pub fn collect_pipes(&self) -> Vec<Arc<dyn Pipe>> {
        self.steps.iter().flat_map(Step::pipes).collect()
    }

    /// Checks the builder's preconditions and runs the validator.
    ///
    /// Falls back to [`ResourceDependencyValidator`] when no validator is
    /// attached. The report is stored on the attached context when one is
    /// present.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unmet precondition, checked in
    /// order: missing context, missing source, no steps, empty parallel
    /// group. Validator findings surface as a validation failure.
    pub fn validate_configuration(&self) -> Result<(), PipeworkError> {
        if self.context.is_none() {
            return Err(PipeworkError::configuration("no context attached"));
        }
        if self.source.is_none() {
            return Err(PipeworkError::configuration("no source bound"));
        }
        self.validate_steps(self.context.as_deref(), Some(&self.effective_validator()))
    }

    /// Runs the same checks as [`Self::validate_configuration`] but always
    /// returns a report instead of failing.
    #[must_use]
    pub fn validate_configuration_for_result(&self) -> ValidationReport {
        let mut messages = Vec::new();

        if self.context.is_none() {
            messages.push("no context attached".to_string());
        }
        if self.source.is_none() {
            messages.push("no source bound".to_string());
        }
        if self.steps.is_empty() {
            messages.push("no steps attached".to_string());
        }
        for step in &self.steps {
            if matches!(step, Step::Parallel { pipes, .. } if pipes.is_empty()) {
                messages.push("parallel step requires at least one pipe".to_string());
            }
        }
        messages.extend(self.effective_validator().validate(&self.collect_pipes()));

        let report = ValidationReport::from_messages(messages);
        if let Some(ctx) = &self.context {
            ctx.store_validation(report.clone());
        }
        report
    }

    fn effective_validator(&self) -> Arc<dyn Validator> {
        self.validator
            .clone()
            .unwrap_or_else(|| Arc::new(ResourceDependencyValidator::new()))
    }

    fn validate_steps(
        &self,
        ctx: Option<&PipeContext>,
        validator: Option<&Arc<dyn Validator>>,
    ) -> Result<(), PipeworkError> {
        if self.steps.is_empty() {
            return Err(PipeworkError::configuration("no steps attached"));
        }
        for step in &self.steps {
            if matches!(step, Step::Parallel { pipes, .. } if pipes.is_empty()) {
                return Err(PipeworkError::configuration(
                    "parallel step requires at least one pipe",
                ));
            }
        }

        if let Some(validator) = validator {
            let report = ValidationReport::from_messages(validator.validate(&self.collect_pipes()));
            for warning in &report.warnings {
                tracing::warn!(pipeline = %self.name, warning = %warning, "Validation warning");
            }
            if let Some(ctx) = ctx {
                ctx.store_validation(report.clone());
            }
            if !report.is_ok() {
                return Err(ValidationFailure::new(report.errors).into());
            }
        }
        Ok(())
    }

    /// Runs the pipeline with a fresh cancellation token.
    ///
    /// # Errors
    ///
    /// Returns the first non-swallowed step error, or a configuration or
    /// validation error detected before execution.
    pub async fn run(&self) -> Result<Arc<PipeContext>, PipeworkError> {
        self.run_with_token(&CancellationToken::new()).await
    }

    /// Runs the pipeline under the caller's cancellation token.
    ///
    /// # Errors
    ///
    /// As [`Self::run`], plus a cancellation error when the token fires.
    pub async fn run_with_token(
        &self,
        token: &CancellationToken,
    ) -> Result<Arc<PipeContext>, PipeworkError> {
        let ctx = self
            .context
            .clone()
            .ok_or_else(|| PipeworkError::configuration("no context attached"))?;
        let source = self
            .source
            .clone()
            .ok_or_else(|| PipeworkError::configuration("no source bound"))?;

        self.run_inner(ctx.clone(), source, token, Some(&self.effective_validator()))
            .await?;
        Ok(ctx)
    }

    /// Runs the pipeline and returns the final output value.
    ///
    /// # Errors
    ///
    /// As [`Self::run`].
    pub async fn flush(&self) -> Result<serde_json::Value, PipeworkError> {
        let ctx = self.run().await?;
        Ok(ctx.output())
    }

    /// Runs the attached steps against an explicit context and source.
    ///
    /// Used directly by sub-pipelines, which inherit the parent's context
    /// and token instead of owning their own. Only an explicitly attached
    /// validator runs here: a nested pipeline's resource requirements may
    /// be satisfied by the parent's pipes, which the outer validator sees
    /// through the flattened pipe list.
    ///
    /// # Errors
    ///
    /// As [`Self::run_with_token`].
    pub async fn run_bound(
        &self,
        ctx: Arc<PipeContext>,
        source: serde_json::Value,
        token: &CancellationToken,
    ) -> Result<(), PipeworkError> {
        self.run_inner(ctx, source, token, self.validator.as_ref())
            .await
    }

    async fn run_inner(
        &self,
        ctx: Arc<PipeContext>,
        source: serde_json::Value,
        token: &CancellationToken,
        validator: Option<&Arc<dyn Validator>>,
    ) -> Result<(), PipeworkError> {
        self.validate_steps(Some(&ctx), validator)?;

        if let Some(options) = &self.default_options {
            ctx.set_error_options(options.clone());
        }
        ctx.bind_input(source);

        if self.metrics_enabled {
            ctx.begin_metrics();
        }
        tracing::info!(pipeline = %self.name, steps = self.steps.len(), "Pipeline starting");

        let result = self.execute_steps(&ctx, token).await;

        if self.metrics_enabled {
            ctx.finish_metrics();
        }
        match &result {
            Ok(()) => tracing::info!(pipeline = %self.name, "Pipeline finished"),
            Err(e) => tracing::error!(pipeline = %self.name, error = %e, "Pipeline failed"),
        }
        result
    }

    async fn execute_steps(
        &self,
        ctx: &Arc<PipeContext>,
        token: &CancellationToken,
    ) -> Result<(), PipeworkError> {
        for (index, step) in self.steps.iter().enumerate() {
            if let Err(e) = token.check() {
                ctx.failures.record(FailureRecord::new(e.to_string()));
                return Err(e);
            }

            let metric = step.metric_name(index);
            tracing::debug!(pipeline = %self.name, step = %metric, "Step starting");

            let started = Instant::now();
            let result = step.execute(ctx, token).await;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            ctx.record_step_duration(&metric, elapsed_ms);

            result?;
        }
        Ok(())
    }

    fn configure_last(&mut self, apply: impl Fn(&mut PipeConfig)) {
        match self.steps.last_mut() {
            Some(Step::Sequential { config, .. } | Step::Conditional { config, .. }) => {
                apply(config);
            }
            Some(Step::Parallel { configs, .. }) => {
                for config in configs {
                    apply(config);
                }
            }
            Some(Step::SubPipeline(_)) => {
                tracing::warn!(
                    pipeline = %self.name,
                    "Step modifier ignored: sub-pipeline steps carry their own configuration"
                );
            }
            None => {
                tracing::warn!(
                    pipeline = %self.name,
                    "Step modifier ignored: no step attached yet"
                );
            }
        }
    }
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("name", &self.name)
            .field("steps", &self.steps)
            .field("has_context", &self.context.is_some())
            .field("has_source", &self.source.is_some())
            .field("has_validator", &self.validator.is_some())
            .field("metrics_enabled", &self.metrics_enabled)
            .finish()
    }
}
