//! Test doubles for exercising pipelines.
//!
//! Shipped as a public module so downstream crates can reuse the same mocks
//! in their own test suites.

pub mod mocks;
