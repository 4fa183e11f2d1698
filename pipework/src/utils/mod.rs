//! Utility functions shared across the crate.

mod memory;

pub use memory::{current_rss_bytes, format_bytes};
