//! Bootstrap utilities for connector hosts.
//!
//! Shared initialization code for processes embedding card connectors.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, ConfigError, LOG_ENV_VAR};

/// Default filter directive when `CARDHUB_LOG` is unset or invalid.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Log filter from `CARDHUB_LOG`, defaulting to "info".
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Initialize tracing with the `CARDHUB_LOG` environment variable.
///
/// Panics if a global subscriber is already installed.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Like [`init_tracing`], but returns false instead of panicking when a
/// global subscriber is already installed.
pub fn try_init_tracing() -> bool {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}

/// Initialize tracing and load configuration.
pub fn bootstrap(config_path: Option<&str>) -> Result<Config, ConfigError> {
    init_tracing();
    let config = Config::load(config_path)?;
    tracing::info!(
        connectors = config.connectors.len(),
        "configuration loaded"
    );
    Ok(config)
}
