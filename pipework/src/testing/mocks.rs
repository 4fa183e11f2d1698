//! Mock pipes with scriptable behavior and call counters.

use crate::cancellation::{sleep_cancellable, CancellationToken};
use crate::context::PipeContext;
use crate::errors::PipeworkError;
use crate::pipes::Pipe;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// A scriptable pipe that can be told to fail its next N invocations.
#[derive(Debug)]
pub struct MockPipe {
    name: String,
    calls: AtomicUsize,
    failures_remaining: AtomicU32,
}

impl MockPipe {
    /// Creates a mock that succeeds until told otherwise.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: AtomicUsize::new(0),
            failures_remaining: AtomicU32::new(0),
        }
    }

    /// Makes the next `n` invocations fail.
    pub fn fail_next_n(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Returns how many times the pipe has been invoked.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Pipe for MockPipe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        _ctx: &PipeContext,
        token: &CancellationToken,
    ) -> Result<(), PipeworkError> {
        token.check()?;
        self.calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(PipeworkError::pipe_failure(&self.name, "scripted failure"));
        }
        Ok(())
    }
}

/// A pipe that always fails with a fixed message.
#[derive(Debug)]
pub struct FailingPipe {
    name: String,
    message: String,
    calls: AtomicUsize,
}

impl FailingPipe {
    /// Creates a pipe that fails every invocation.
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns how many times the pipe has been invoked.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Pipe for FailingPipe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        _ctx: &PipeContext,
        token: &CancellationToken,
    ) -> Result<(), PipeworkError> {
        token.check()?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(PipeworkError::pipe_failure(&self.name, &self.message))
    }
}

/// A pipe that fails its first `fail_count` invocations and then succeeds.
#[derive(Debug)]
pub struct FlakyPipe {
    name: String,
    fail_count: usize,
    calls: AtomicUsize,
}

impl FlakyPipe {
    /// Creates a pipe that fails the first `fail_count` invocations.
    #[must_use]
    pub fn new(name: impl Into<String>, fail_count: usize) -> Self {
        Self {
            name: name.into(),
            fail_count,
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns how many times the pipe has been invoked.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Pipe for FlakyPipe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        _ctx: &PipeContext,
        token: &CancellationToken,
    ) -> Result<(), PipeworkError> {
        token.check()?;
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        if attempt <= self.fail_count {
            return Err(PipeworkError::pipe_failure(
                &self.name,
                format!("transient failure on attempt {attempt}"),
            ));
        }
        Ok(())
    }
}

/// A pipe that sleeps before succeeding, polling cancellation throughout.
#[derive(Debug)]
pub struct SlowPipe {
    name: String,
    delay: Duration,
    calls: AtomicUsize,
}

impl SlowPipe {
    /// Creates a pipe that sleeps for `delay_ms` milliseconds.
    #[must_use]
    pub fn new(name: impl Into<String>, delay_ms: u64) -> Self {
        Self {
            name: name.into(),
            delay: Duration::from_millis(delay_ms),
            calls: AtomicUsize::new(0),
        }
    }

    /// Returns how many times the pipe has been invoked.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Pipe for SlowPipe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        _ctx: &PipeContext,
        token: &CancellationToken,
    ) -> Result<(), PipeworkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        sleep_cancellable(self.delay, token).await
    }
}

/// A pipe that adds a fixed amount to the numeric `result` field of the
/// output, seeding it with zero when absent.
#[derive(Debug)]
pub struct AddPipe {
    name: String,
    amount: i64,
}

impl AddPipe {
    /// Creates a pipe adding `amount` to `output["result"]`.
    #[must_use]
    pub fn new(name: impl Into<String>, amount: i64) -> Self {
        Self {
            name: name.into(),
            amount,
        }
    }
}

#[async_trait]
impl Pipe for AddPipe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        ctx: &PipeContext,
        token: &CancellationToken,
    ) -> Result<(), PipeworkError> {
        token.check()?;
        let amount = self.amount;
        ctx.with_output_mut(|out| {
            if !out.is_object() {
                *out = serde_json::json!({});
            }
            let current = out["result"].as_i64().unwrap_or(0);
            out["result"] = serde_json::json!(current + amount);
        });
        Ok(())
    }
}

/// A pipe with declared resource dependencies that adds each provided key
/// to the context resources when it runs.
#[derive(Debug)]
pub struct ResourcePipe {
    name: String,
    requires: Vec<String>,
    provides: Vec<String>,
}

impl ResourcePipe {
    /// Creates a pipe declaring the given resource dependencies.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        requires: impl IntoIterator<Item = impl Into<String>>,
        provides: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            requires: requires.into_iter().map(Into::into).collect(),
            provides: provides.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Pipe for ResourcePipe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        ctx: &PipeContext,
        token: &CancellationToken,
    ) -> Result<(), PipeworkError> {
        token.check()?;
        for key in &self.requires {
            ctx.resources.get(key)?;
        }
        for key in &self.provides {
            ctx.resources.try_add(key, serde_json::json!({"provided_by": self.name}));
        }
        Ok(())
    }

    fn required_resources(&self) -> Vec<String> {
        self.requires.clone()
    }

    fn provided_resources(&self) -> Vec<String> {
        self.provides.clone()
    }
}
