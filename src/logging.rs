//! Tracing setup.
//!
//! Diagnostics go to stderr through a `tracing-subscriber` fmt layer, so
//! stdout carries only command output. `RUST_LOG` overrides the level
//! from `[logging]`.

use anyhow::{anyhow, Result};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install the global subscriber. Safe to call once per process; a second
/// call returns an error instead of panicking.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| anyhow!("invalid logging.level '{}': {}", config.level, e))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if config.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(atty::is(atty::Stream::Stderr))
                    .with_target(false),
            )
            .try_init()
    };
    result.map_err(|e| anyhow!("failed to install tracing subscriber: {}", e))
}
