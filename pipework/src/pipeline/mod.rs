//! Pipeline construction and execution.

mod builder;

#[cfg(test)]
mod integration_tests;

pub use builder::PipelineBuilder;
