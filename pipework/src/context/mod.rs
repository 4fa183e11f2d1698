//! Shared mutable execution context.
//!
//! A [`PipeContext`] is the bag of state that flows by reference through
//! every step and pipe of a run: the source input, the progressively built
//! output, named resources, failure logs, metrics, and validation results.
//! It is intentionally global-within-a-run mutable state; every mutating
//! operation is explicit and contract violations fail loudly. The context
//! provides no locking beyond per-field consistency - concurrent pipes in a
//! parallel step that touch the same resource key race by design, and that
//! is the caller's responsibility.

mod failures;
mod metrics;
mod resources;

pub use failures::{FailureLog, FailureRecord};
pub use metrics::PerformanceMetrics;
pub use resources::ResourceBag;

use crate::strategies::ErrorHandlingOptions;
use crate::validation::ValidationReport;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// The mutable context shared by every step and pipe of a pipeline run.
///
/// Created by the caller before building the pipeline and owned by the
/// caller afterwards; the library only mutates it.
#[derive(Debug, Default)]
pub struct PipeContext {
    /// Source input, bound once per execution.
    input: RwLock<serde_json::Value>,
    /// Output value, mutated progressively by pipes.
    output: RwLock<serde_json::Value>,
    /// Named resource store.
    pub resources: ResourceBag,
    /// Ordered failure logs.
    pub failures: FailureLog,
    /// Whether step failures are swallowed by default.
    continue_on_failure: AtomicBool,
    /// Performance metrics, present when enabled.
    metrics: RwLock<Option<PerformanceMetrics>>,
    /// Pipeline-wide error-handling defaults.
    error_options: RwLock<Option<ErrorHandlingOptions>>,
    /// Result of the last configuration validation.
    validation: RwLock<ValidationReport>,
    /// Whether validation has completed for this configuration.
    validated: AtomicBool,
}

impl PipeContext {
    /// Creates a new empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current input value.
    #[must_use]
    pub fn input(&self) -> serde_json::Value {
        self.input.read().clone()
    }

    /// Binds the source input for this execution.
    pub fn bind_input(&self, value: serde_json::Value) {
        *self.input.write() = value;
    }

    /// Returns the current output value.
    #[must_use]
    pub fn output(&self) -> serde_json::Value {
        self.output.read().clone()
    }

    /// Replaces the output value.
    pub fn set_output(&self, value: serde_json::Value) {
        *self.output.write() = value;
    }

    /// Mutates the output value in place.
    ///
    /// The lock is held only for the duration of the closure; the closure
    /// must not block.
    pub fn with_output_mut<R>(&self, f: impl FnOnce(&mut serde_json::Value) -> R) -> R {
        f(&mut self.output.write())
    }

    /// Returns the pipeline-default continue-on-failure flag.
    #[must_use]
    pub fn continue_on_failure(&self) -> bool {
        self.continue_on_failure.load(Ordering::SeqCst)
    }

    /// Sets the pipeline-default continue-on-failure flag.
    pub fn set_continue_on_failure(&self, value: bool) {
        self.continue_on_failure.store(value, Ordering::SeqCst);
    }

    /// Returns a copy of the metrics record, if metrics are enabled.
    #[must_use]
    pub fn metrics(&self) -> Option<PerformanceMetrics> {
        self.metrics.read().clone()
    }

    /// Starts a fresh metrics record for a new run.
    ///
    /// A correlation id from a previous record on this context is preserved.
    pub fn begin_metrics(&self) {
        let mut slot = self.metrics.write();
        let prior_id = slot.as_ref().map(|m| m.correlation_id.clone());
        *slot = Some(PerformanceMetrics::start(prior_id));
    }

    /// Records a step duration into the active metrics record, if any.
    pub fn record_step_duration(&self, name: impl Into<String>, duration_ms: f64) {
        if let Some(metrics) = self.metrics.write().as_mut() {
            metrics.record_step(name, duration_ms);
        }
    }

    /// Finalizes the active metrics record, if any.
    pub fn finish_metrics(&self) {
        if let Some(metrics) = self.metrics.write().as_mut() {
            metrics.finish();
        }
    }

    /// Returns the pipeline-wide error-handling defaults, if set.
    #[must_use]
    pub fn error_options(&self) -> Option<ErrorHandlingOptions> {
        self.error_options.read().clone()
    }

    /// Sets the pipeline-wide error-handling defaults.
    pub fn set_error_options(&self, options: ErrorHandlingOptions) {
        *self.error_options.write() = Some(options);
    }

    /// Returns the continue-on-failure default after applying error options.
    #[must_use]
    pub fn effective_continue_on_failure(&self) -> bool {
        self.error_options()
            .and_then(|o| o.continue_on_failure)
            .unwrap_or_else(|| self.continue_on_failure())
    }

    /// Stores the result of configuration validation.
    pub fn store_validation(&self, report: ValidationReport) {
        *self.validation.write() = report;
        self.validated.store(true, Ordering::SeqCst);
    }

    /// Returns the last stored validation report.
    #[must_use]
    pub fn validation_report(&self) -> ValidationReport {
        self.validation.read().clone()
    }

    /// Returns true if validation has completed for this configuration.
    #[must_use]
    pub fn is_validated(&self) -> bool {
        self.validated.load(Ordering::SeqCst)
    }
}
