//! Tracing subscriber setup.

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{LogConfig, LogFormat};
use crate::error::{GatekeeperError, Result};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Fails if a
/// subscriber is already installed.
pub fn init(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| {
            GatekeeperError::Config(format!("Invalid log level {:?}: {}", config.level, e))
        })?;

    let builder = fmt().with_env_filter(filter).with_target(false);

    let installed = match config.format {
        LogFormat::Pretty => builder.with_thread_ids(true).try_init(),
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
    };

    installed.map_err(|e| {
        GatekeeperError::Config(format!("Failed to install tracing subscriber: {e}"))
    })
}
