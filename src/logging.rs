//! Tracing subscriber setup for the client binary.

use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt};

/// Build the event filter: `RUST_LOG` when set, otherwise `level`.
///
/// # Errors
/// Returns an error if `level` is not a valid filter directive.
pub fn filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level.trim().to_ascii_lowercase())
        .map_err(|e| anyhow!("invalid log level {level:?}: {e}"))
}

/// Install the global `fmt` subscriber.
///
/// # Errors
/// Returns an error if the filter is invalid or a subscriber is already set.
pub fn init(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(filter(level)?)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}
