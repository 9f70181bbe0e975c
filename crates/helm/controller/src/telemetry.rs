//! Tracing subscriber setup

use crate::config::LoggingConfig;
use crate::error::{ControllerError, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let subscriber = tracing_subscriber::registry().with(env_filter);

    let installed = if config.json {
        subscriber.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        subscriber.with(fmt::layer().with_target(true)).try_init()
    };

    installed.map_err(|e| ControllerError::Telemetry(e.to_string()))
}
