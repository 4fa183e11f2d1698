//! Nested pipelines executing against the parent's context.

use crate::cancellation::CancellationToken;
use crate::context::PipeContext;
use crate::errors::PipeworkError;
use crate::pipeline::PipelineBuilder;
use crate::pipes::Pipe;
use futures::future::BoxFuture;
use std::sync::Arc;

/// A pipeline nested inside another as a single step.
///
/// The inner pipeline runs against the parent's context and cancellation
/// token, so resources, failures, and output mutations flow through the
/// same state the parent sees. Its input is the parent's current input.
pub struct SubPipeline {
    builder: PipelineBuilder,
}

impl SubPipeline {
    /// Creates a sub-pipeline by configuring a fresh inner builder.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        configure: impl FnOnce(PipelineBuilder) -> PipelineBuilder,
    ) -> Self {
        Self {
            builder: configure(PipelineBuilder::new(name)),
        }
    }

    /// Returns the inner pipeline's name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.builder.name()
    }

    /// Returns every pipe attached to the inner pipeline, recursively.
    #[must_use]
    pub fn pipes(&self) -> Vec<Arc<dyn Pipe>> {
        self.builder.collect_pipes()
    }

    /// Runs the inner pipeline against the parent's context.
    ///
    /// Boxed to break the recursion between steps and pipelines.
    pub fn execute<'a>(
        &'a self,
        ctx: &'a Arc<PipeContext>,
        token: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), PipeworkError>> {
        Box::pin(async move {
            tracing::debug!(sub_pipeline = self.name(), "Entering sub-pipeline");
            self.builder.run_bound(ctx.clone(), ctx.input(), token).await
        })
    }
}

impl std::fmt::Debug for SubPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubPipeline")
            .field("name", &self.name())
            .finish()
    }
}
