//! Tracing subscriber setup for embedding applications

use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

/// Parse a level name, falling back to `info`
pub fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Install a stderr subscriber.
///
/// `RUST_LOG` takes precedence over `level`. Returns `false` when a global
/// subscriber was already installed.
pub fn init_logging(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(parse_level(level).to_string().to_lowercase()));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
