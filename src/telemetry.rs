//! Tracing bootstrap for binaries, examples, and manual test runs.
//!
//! The library itself only emits `tracing` events; subscribing is the
//! embedder's job. This helper wires up the conventional subscriber:
//! env-filter driven (`RUST_LOG`), compact fmt output.

use tracing_subscriber::EnvFilter;

/// Install a global subscriber reading `RUST_LOG`, defaulting to `info`
/// for this crate. Safe to call more than once; only the first call wins.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pixelsmith=info,warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
