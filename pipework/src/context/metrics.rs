//! Performance metrics for pipeline execution.

use crate::utils::{current_rss_bytes, format_bytes};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A read-only-by-convention record of a pipeline run's performance.
///
/// Populated by the builder when metrics are enabled: timestamps and a
/// memory sample at start, per-step durations while running, and totals at
/// the end. Memory samples are best-effort and zero when the host exposes
/// nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Correlation id for tying the run to external telemetry.
    pub correlation_id: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished, if it has.
    pub ended_at: Option<DateTime<Utc>>,
    /// Total wall-clock duration in milliseconds.
    pub total_duration_ms: Option<f64>,
    /// Per-step durations keyed by derived step name.
    pub step_durations_ms: HashMap<String, f64>,
    /// Resident memory sample at start, in bytes.
    pub memory_start_bytes: u64,
    /// Resident memory sample at end, in bytes.
    pub memory_end_bytes: Option<u64>,
    /// Caller-extensible custom metrics.
    #[serde(default)]
    pub custom: HashMap<String, serde_json::Value>,
}

impl PerformanceMetrics {
    /// Starts a new metrics record.
    ///
    /// A correlation id is generated unless the caller carries one over
    /// from a previous record.
    #[must_use]
    pub fn start(correlation_id: Option<String>) -> Self {
        Self {
            correlation_id: correlation_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            started_at: Utc::now(),
            ended_at: None,
            total_duration_ms: None,
            step_durations_ms: HashMap::new(),
            memory_start_bytes: current_rss_bytes(),
            memory_end_bytes: None,
            custom: HashMap::new(),
        }
    }

    /// Records the duration of one step.
    pub fn record_step(&mut self, name: impl Into<String>, duration_ms: f64) {
        self.step_durations_ms.insert(name.into(), duration_ms);
    }

    /// Stamps end time, total duration, and the final memory sample.
    pub fn finish(&mut self) {
        let ended = Utc::now();
        let total = (ended - self.started_at)
            .num_microseconds()
            .map_or(0.0, |us| us as f64 / 1000.0);

        self.ended_at = Some(ended);
        self.total_duration_ms = Some(total);
        self.memory_end_bytes = Some(current_rss_bytes());
    }

    /// Adds a custom metric.
    pub fn set_custom(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.custom.insert(key.into(), value);
    }

    /// Returns true if the record has been finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Renders a one-line human-readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let duration = self
            .total_duration_ms
            .map_or_else(|| "in progress".to_string(), |ms| format!("{ms:.1}ms"));
        let memory = self
            .memory_end_bytes
            .map_or_else(|| format_bytes(self.memory_start_bytes), format_bytes);

        format!(
            "run {}: {} over {} steps, rss {}",
            self.correlation_id,
            duration,
            self.step_durations_ms.len(),
            memory,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_generates_correlation_id() {
        let metrics = PerformanceMetrics::start(None);
        assert!(!metrics.correlation_id.is_empty());
        assert!(!metrics.is_finished());
    }

    #[test]
    fn test_start_preserves_correlation_id() {
        let metrics = PerformanceMetrics::start(Some("run-42".to_string()));
        assert_eq!(metrics.correlation_id, "run-42");
    }

    #[test]
    fn test_record_and_finish() {
        let mut metrics = PerformanceMetrics::start(None);
        metrics.record_step("step_1_fetch", 12.5);
        metrics.record_step("step_2_transform", 3.0);
        metrics.finish();

        assert!(metrics.is_finished());
        assert_eq!(metrics.step_durations_ms.len(), 2);
        assert_eq!(metrics.step_durations_ms["step_1_fetch"], 12.5);
        assert!(metrics.total_duration_ms.unwrap() >= 0.0);
        assert!(metrics.memory_end_bytes.is_some());
    }

    #[test]
    fn test_custom_metrics() {
        let mut metrics = PerformanceMetrics::start(None);
        metrics.set_custom("rows_processed", serde_json::json!(1024));

        assert_eq!(metrics.custom["rows_processed"], serde_json::json!(1024));
    }

    #[test]
    fn test_summary_mentions_steps() {
        let mut metrics = PerformanceMetrics::start(Some("abc".to_string()));
        metrics.record_step("step_1", 1.0);
        metrics.finish();

        let summary = metrics.summary();
        assert!(summary.contains("abc"));
        assert!(summary.contains("1 steps"));
    }
}
