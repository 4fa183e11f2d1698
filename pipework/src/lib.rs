//! # Pipework
//!
//! An in-process data-processing pipeline composition library.
//!
//! Callers assemble discrete processing units ("pipes") over a shared mutable
//! context, and pipework orchestrates their execution with:
//!
//! - **Step-based control flow**: sequential, parallel, conditional, and
//!   nested sub-pipeline steps
//! - **Resilience policies**: retry, circuit breaker, and fallback wrappers
//!   around individual pipe executions
//! - **Recovery strategies**: reusable pipeline-wide or per-pipe error
//!   recovery with the same wrapping contract as policies
//! - **Resource validation**: static checking of declared resource
//!   provider/consumer relationships before execution
//! - **Cancellation handling**: cooperative cancellation threaded through
//!   every execution boundary
//! - **Performance metrics**: per-step timing and best-effort memory samples
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pipework::prelude::*;
//!
//! let ctx = Arc::new(PipeContext::new());
//! let builder = PipelineBuilder::new("my-pipeline")
//!     .attach_context(ctx.clone())
//!     .set_source(serde_json::json!({"value": 5}))
//!     .attach_pipe(Arc::new(FetchPipe::new()))
//!     .attach_pipe(Arc::new(TransformPipe::new()));
//!
//! builder.run().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod context;
pub mod errors;
pub mod observability;
pub mod pipeline;
pub mod pipes;
pub mod policies;
pub mod steps;
pub mod strategies;
pub mod subpipeline;
pub mod testing;
pub mod utils;
pub mod validation;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::{sleep_cancellable, CancellationToken};
    pub use crate::observability::{init_tracing, init_tracing_json};
    pub use crate::context::{
        FailureLog, FailureRecord, PerformanceMetrics, PipeContext, ResourceBag,
    };
    pub use crate::errors::{PipeworkError, ResourceError, ValidationFailure};
    pub use crate::pipeline::PipelineBuilder;
    pub use crate::pipes::{FnPipe, NoOpPipe, Pipe};
    pub use crate::policies::{
        BackoffMode, BreakerCore, BreakerState, CircuitBreakerPolicy, ErrorHandlingPolicy,
        ErrorPredicate, FallbackPolicy, JitterMode, RetryConfig, RetryPolicy,
    };
    pub use crate::steps::{PipeConfig, Step, StepKind, StepPredicate};
    pub use crate::strategies::{
        CircuitBreakerStrategy, ErrorHandlingOptions, ErrorRecoveryStrategy,
        RetryWithBackoffStrategy,
    };
    pub use crate::subpipeline::SubPipeline;
    pub use crate::validation::{
        ResourceDependencyValidator, ValidationReport, Validator, WARNING_PREFIX,
    };
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_prelude_smoke() {
        let ctx = Arc::new(PipeContext::new());
        let output = PipelineBuilder::new("smoke")
            .attach_context(ctx)
            .set_source(serde_json::json!({"value": 5}))
            .attach_pipe(Arc::new(FnPipe::new("echo", |ctx: &PipeContext| {
                ctx.set_output(ctx.input());
                Ok(())
            })))
            .flush()
            .await
            .unwrap();

        assert_eq!(output["value"], serde_json::json!(5));
    }
}
