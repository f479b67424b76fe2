use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. RUST_LOG wins over `default_filter`.
///
/// Output goes to stderr: stdout carries the response stream.
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true)
        .try_init();
}
