//! Pre-execution configuration validation.
//!
//! Validators inspect the attached pipes before any of them run and return
//! human-readable findings. Findings prefixed with [`WARNING_PREFIX`] are
//! advisory; everything else is an error that blocks execution.

use crate::pipes::Pipe;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Prefix marking a validator finding as advisory rather than blocking.
pub const WARNING_PREFIX: &str = "warning:";

/// The outcome of a configuration validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Blocking findings.
    pub errors: Vec<String>,
    /// Advisory findings, with the warning prefix stripped.
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// Buckets raw validator messages into errors and warnings by prefix.
    #[must_use]
    pub fn from_messages(messages: Vec<String>) -> Self {
        let mut report = Self::default();
        for message in messages {
            if let Some(rest) = message.strip_prefix(WARNING_PREFIX) {
                report.warnings.push(rest.trim_start().to_string());
            } else {
                report.errors.push(message);
            }
        }
        report
    }

    /// Returns true when no blocking findings were produced.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Trait for pipeline configuration validators.
pub trait Validator: Send + Sync {
    /// Inspects the full set of attached pipes, in attachment order, and
    /// returns findings. An empty vector means the configuration passed.
    fn validate(&self, pipes: &[Arc<dyn Pipe>]) -> Vec<String>;
}

/// Checks that every resource key some pipe requires is provided by some
/// pipe in the pipeline.
///
/// The check is over the whole manifest, not execution order: a provider
/// attached after its consumer still satisfies the dependency. Runtime
/// ordering mistakes surface as resource lookup failures instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceDependencyValidator;

impl ResourceDependencyValidator {
    /// Creates a new resource-dependency validator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Validator for ResourceDependencyValidator {
    fn validate(&self, pipes: &[Arc<dyn Pipe>]) -> Vec<String> {
        let provided: HashSet<String> = pipes
            .iter()
            .flat_map(|p| p.provided_resources())
            .collect();

        let mut messages = Vec::new();
        let mut reported: HashSet<(String, String)> = HashSet::new();

        for pipe in pipes {
            for key in pipe.required_resources() {
                if !provided.contains(&key)
                    && reported.insert((pipe.name().to_string(), key.clone()))
                {
                    messages.push(format!(
                        "pipe '{}' requires resource '{}' but no pipe provides it",
                        pipe.name(),
                        key
                    ));
                }
            }
        }

        messages
    }
}
