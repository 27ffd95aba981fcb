//! Application configuration.
//!
//! Per-connector settings loaded from YAML files or environment variables.
//! Each connector names the backend errors it tolerates and how long the
//! host waits for its backends.

mod connector;

pub use connector::ConnectorConfig;

use std::collections::HashMap;

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "CARDHUB_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "CARDHUB";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "CARDHUB_LOG";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("invalid suppressed status code: {0}")]
    InvalidStatus(u16),
}

/// Application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Connector settings keyed by connector name.
    pub connectors: HashMap<String, ConnectorConfig>,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Sources, later ones overriding earlier ones:
    /// 1. `config.yaml` in the current directory, if present
    /// 2. `path`, if given
    /// 3. the file named by `CARDHUB_CONFIG`, if set
    /// 4. `CARDHUB__*` environment variables, e.g.
    ///    `CARDHUB__CONNECTORS__JIRA__SUPPRESS_NOT_FOUND=true`
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Settings for `name`, falling back to defaults for unknown connectors.
    ///
    /// Names are matched case-insensitively; environment overrides arrive
    /// lowercased.
    pub fn connector(&self, name: &str) -> ConnectorConfig {
        self.connectors
            .get(name)
            .or_else(|| self.connectors.get(&name.to_lowercase()))
            .cloned()
            .unwrap_or_default()
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}
