use tracing_subscriber::EnvFilter;

/// Sets up the global tracing subscriber, filtered by `RUST_LOG` (default `info`).
///
/// Also forwards `log` records, so actix's access logger ends up in the same output.
/// Calling it again is a no-op.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
