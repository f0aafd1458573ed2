//! Telemetry helpers for structured logging and tracing.

/// Install a default env-filtered `fmt` subscriber if none is set.
///
/// Callers are free to install their own subscriber instead; the filter is
/// read from `RUST_LOG` and defaults to `warn`.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init();
}
