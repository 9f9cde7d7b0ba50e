use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber for structured logging at `info`.
///
/// - Debug builds: pretty-printed human-readable output
/// - Release builds: JSON-formatted output for log aggregation
///
/// `RUST_LOG` overrides the level. Calling this twice is harmless; the
/// second call leaves the first subscriber in place.
pub fn init_tracing() {
    init_with_default("info");
}

/// Like [`init_tracing`] with a different default filter directive. Output
/// goes to stderr so it never mixes with a binary's stdout.
pub fn init_with_default(directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let result = if cfg!(debug_assertions) {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
