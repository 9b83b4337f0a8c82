//! Logging initialization for the dispatcher.

use tracing_subscriber::EnvFilter;

/// Initialize the logging system.
///
/// Sets up tracing with the given default level; the RUST_LOG environment
/// variable takes precedence when set.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
