//! Pipe trait and basic implementations.
//!
//! Pipes are the atomic units of work in a pipework pipeline. A pipe is
//! stateless by contract (an instance may keep internal counters; the
//! library never resets them) and may declare the resource keys it requires
//! and provides for the pre-execution dependency scan.

use crate::cancellation::CancellationToken;
use crate::context::PipeContext;
use crate::errors::PipeworkError;
use async_trait::async_trait;
use std::fmt::Debug;

/// Trait for pipeline pipes.
#[async_trait]
pub trait Pipe: Send + Sync {
    /// Returns the name of the pipe, used in failure records and metrics.
    fn name(&self) -> &str;

    /// Executes the pipe against the shared context.
    ///
    /// Implementations should poll `token` across long suspensions so
    /// cancellation propagates promptly.
    async fn execute(
        &self,
        ctx: &PipeContext,
        token: &CancellationToken,
    ) -> Result<(), PipeworkError>;

    /// Resource keys this pipe requires to be provided somewhere in the
    /// pipeline. Default: none.
    fn required_resources(&self) -> Vec<String> {
        Vec::new()
    }

    /// Resource keys this pipe provides to the pipeline. Default: none.
    fn provided_resources(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A simple function-based pipe.
pub struct FnPipe<F>
where
    F: Fn(&PipeContext) -> Result<(), PipeworkError> + Send + Sync,
{
    name: String,
    func: F,
    requires: Vec<String>,
    provides: Vec<String>,
}

impl<F> FnPipe<F>
where
    F: Fn(&PipeContext) -> Result<(), PipeworkError> + Send + Sync,
{
    /// Creates a new function-based pipe.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            requires: Vec::new(),
            provides: Vec::new(),
        }
    }

    /// Declares required resource keys.
    #[must_use]
    pub fn with_requires(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.requires = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Declares provided resource keys.
    #[must_use]
    pub fn with_provides(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.provides = keys.into_iter().map(Into::into).collect();
        self
    }
}

impl<F> Debug for FnPipe<F>
where
    F: Fn(&PipeContext) -> Result<(), PipeworkError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnPipe").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> Pipe for FnPipe<F>
where
    F: Fn(&PipeContext) -> Result<(), PipeworkError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        ctx: &PipeContext,
        token: &CancellationToken,
    ) -> Result<(), PipeworkError> {
        token.check()?;
        (self.func)(ctx)
    }

    fn required_resources(&self) -> Vec<String> {
        self.requires.clone()
    }

    fn provided_resources(&self) -> Vec<String> {
        self.provides.clone()
    }
}

/// A no-op pipe for testing and placeholder slots.
#[derive(Debug, Clone)]
pub struct NoOpPipe {
    name: String,
}

impl NoOpPipe {
    /// Creates a new no-op pipe.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Pipe for NoOpPipe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        _ctx: &PipeContext,
        _token: &CancellationToken,
    ) -> Result<(), PipeworkError> {
        Ok(())
    }
}
