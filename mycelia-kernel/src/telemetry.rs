//! Global `tracing` subscriber setup (§9 Ambient Stack: Logging).

use tracing_subscriber::EnvFilter;

/// Initializes the global `tracing` subscriber with a standard `fmt` layer.
///
/// Respects `RUST_LOG`, falling back to `info` when unset. Call this once,
/// at process start, before bootstrapping a [`crate::Kernel`].
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}
