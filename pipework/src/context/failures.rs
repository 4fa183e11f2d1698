//! Failure recording for pipeline execution.
//!
//! The context keeps two ordered logs: a flat message log and a detailed
//! log carrying the originating pipe, a timestamp, and (for retries) the
//! attempt number.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Record of a single recorded failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    /// The failure message.
    pub message: String,
    /// The pipe the failure originated from, when known.
    pub pipe: Option<String>,
    /// When the failure was recorded.
    pub timestamp: DateTime<Utc>,
    /// The attempt number for retried executions (1-indexed).
    pub attempt: Option<u32>,
}

impl FailureRecord {
    /// Creates a new failure record stamped with the current time.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            pipe: None,
            timestamp: Utc::now(),
            attempt: None,
        }
    }

    /// Sets the originating pipe.
    #[must_use]
    pub fn with_pipe(mut self, pipe: impl Into<String>) -> Self {
        self.pipe = Some(pipe.into());
        self
    }

    /// Sets the attempt number.
    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }
}

/// Ordered, thread-safe failure logs for a pipeline run.
#[derive(Debug, Default)]
pub struct FailureLog {
    messages: RwLock<Vec<String>>,
    records: RwLock<Vec<FailureRecord>>,
}

impl FailureLog {
    /// Creates a new empty failure log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure into both logs.
    pub fn record(&self, record: FailureRecord) {
        self.messages.write().push(record.message.clone());
        self.records.write().push(record);
    }

    /// Returns the flat message log in recording order.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.messages.read().clone()
    }

    /// Returns the detailed records in recording order.
    #[must_use]
    pub fn records(&self) -> Vec<FailureRecord> {
        self.records.read().clone()
    }

    /// Returns the number of recorded failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Returns the most recent record, if any.
    #[must_use]
    pub fn last(&self) -> Option<FailureRecord> {
        self.records.read().last().cloned()
    }
}
