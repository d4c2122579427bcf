//! `tracing` subscriber setup.
//!
//! condor only emits events through `tracing`; it never installs a subscriber on
//! its own. Binaries call [`init`] once at startup.

use thiserror::Error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogConfig, LogFormat};

#[derive(Debug, Error)]
#[error("failed to install the tracing subscriber: {0}")]
pub struct LoggingError(#[from] tracing_subscriber::util::TryInitError);

/// Builds the filter: `RUST_LOG` when set, the configured level otherwise.
pub fn filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Installs a global fmt subscriber (plain text or JSON lines).
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init(config: &LogConfig) -> Result<(), LoggingError> {
    let registry = tracing_subscriber::registry().with(filter(config));
    match config.format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init()?,
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init()?,
    }
    Ok(())
}
