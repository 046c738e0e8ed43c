use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::rules::ValidationRules;
use crate::trusted_time::TimeMonitorConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Process-wide guard configuration, loaded once at startup.
///
/// Every section and field falls back to its default when absent.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub rules: ValidationRules,
    pub time_monitor: TimeMonitorConfig,
}

impl GuardConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: GuardConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(reason) = self.rules.consistency_error() {
            return Err(ConfigError::Invalid(reason));
        }

        let delta = self.time_monitor.acceptable_time_delta_secs;
        if delta.is_nan() || delta <= 0.0 {
            return Err(ConfigError::Invalid("acceptable time delta must be positive"));
        }
        if self.time_monitor.ntp_timeout_ms == 0 {
            return Err(ConfigError::Invalid("reference timeout must be non-zero"));
        }
        if self.time_monitor.loop_interval_secs == 0 {
            return Err(ConfigError::Invalid("loop interval must be non-zero"));
        }

        Ok(())
    }
}
