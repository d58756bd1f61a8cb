use tracing_subscriber::EnvFilter;

/// Initialize tracing for the node process.
///
/// `RUST_LOG` takes precedence; `default_level` applies otherwise.
pub fn init(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // try_init so tests can call this repeatedly without panicking
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
