//! Per-connector settings.

use std::time::Duration;

use http::StatusCode;
use serde::Deserialize;

use super::ConfigError;
use crate::aggregate::Aggregator;
use crate::classify::SuppressionPolicy;

/// Settings for one card connector.
///
/// With every field at its default the connector propagates all backend
/// failures and waits indefinitely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Drop work items whose backend answers 404.
    pub suppress_not_found: bool,
    /// Drop work items whose backend answers 400.
    pub suppress_bad_request: bool,
    /// Further status codes to drop.
    pub suppress_statuses: Vec<u16>,
    /// How long the host waits for the whole aggregate, in milliseconds.
    pub request_timeout_ms: Option<u64>,
}

impl ConnectorConfig {
    /// Build the suppression policy these settings describe.
    pub fn policy(&self) -> Result<SuppressionPolicy, ConfigError> {
        let mut policy = SuppressionPolicy::propagate_all();
        if self.suppress_not_found {
            policy = policy.or_not_found();
        }
        if self.suppress_bad_request {
            policy = policy.or_bad_request();
        }
        for &code in &self.suppress_statuses {
            let status =
                StatusCode::from_u16(code).map_err(|_| ConfigError::InvalidStatus(code))?;
            policy = policy.or_status(status);
        }
        Ok(policy)
    }

    /// Host deadline for one aggregate, if configured.
    pub fn timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    /// Aggregator using this connector's suppression policy.
    pub fn aggregator<P: Send + 'static>(&self) -> Result<Aggregator<P>, ConfigError> {
        Ok(Aggregator::new(self.policy()?))
    }
}
