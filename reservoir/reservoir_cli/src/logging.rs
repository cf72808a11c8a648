//! Log backend for the binary.
//!
//! The libraries log through the `log` facade; `try_init` installs the
//! bridge that forwards those records to the `tracing` subscriber.

use reservoir_core::{LogLevel, LoggingConfig};
use tracing_subscriber::EnvFilter;

const CRATES: [&str; 3] = ["reservoir_core", "reservoir_concurrency", "reservoir"];

/// Install a stderr subscriber.
///
/// An explicit `--log-level` wins, then `RUST_LOG`, then the configured level.
pub fn init(cli_level: Option<LogLevel>, config: &LoggingConfig) {
    let filter = match cli_level {
        Some(level) => crate_filter(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| crate_filter(config.level)),
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn crate_filter(level: LogLevel) -> EnvFilter {
    let directives = CRATES
        .iter()
        .map(|name| format!("{}={}", name, level.as_str()))
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::new(directives)
}
