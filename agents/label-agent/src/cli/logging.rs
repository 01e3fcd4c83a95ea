//! Logging setup
//!
//! Installs the global tracing subscriber. `RUST_LOG` takes precedence over
//! the configured level, and is also what a relaunched instance inherits.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::cli::config::LoggingConfig;

/// Environment variable carrying the log filter
pub const LOG_ENV_VAR: &str = "RUST_LOG";

/// Build the filter from `RUST_LOG`, falling back to the configured level
pub fn build_filter(config: &LoggingConfig, verbose: bool) -> EnvFilter {
    let level = if verbose { "debug" } else { config.level.as_str() };
    EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize the global subscriber
pub fn init(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let filter = build_filter(config, verbose);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    let result = match config.format.as_str() {
        "json" => builder.json().try_init(),
        "compact" => builder.compact().try_init(),
        _ => builder
            .with_file(true)
            .with_line_number(true)
            .pretty()
            .try_init(),
    };

    result
        .map_err(|e| anyhow::anyhow!("{}", e))
        .context("Failed to install tracing subscriber")
}
