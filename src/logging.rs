//! Tracing subscriber setup for the `simdaq` binary.
//!
//! `RUST_LOG` wins over the configured level when set.

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// Build the filter: `RUST_LOG` if present, otherwise `level`.
pub fn filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).map_err(|e| anyhow!("invalid log level '{level}': {e}")),
    }
}

/// Install the global subscriber, plain text or JSON lines.
pub fn init(level: &str, json: bool) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(level)?)
        .with_target(false);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}
