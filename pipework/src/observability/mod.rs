//! Tracing subscriber setup.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a global tracing subscriber driven by `RUST_LOG`.
///
/// Defaults to `info` when the variable is unset. Safe to call more than
/// once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Installs a global tracing subscriber emitting JSON lines.
///
/// Intended for deployments shipping logs to a collector. Same filter and
/// idempotency behavior as [`init_tracing`].
pub fn init_tracing_json() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .json()
        .try_init();
}
