//! Tracing setup for binaries embedding the orchestrator.

use tracing_subscriber::{fmt, EnvFilter};

/// Initializes a global `tracing` subscriber.
///
/// Filtering follows `RUST_LOG`, defaulting to `info` for this crate.
/// Safe to call more than once; subsequent calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("conductor=info"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
