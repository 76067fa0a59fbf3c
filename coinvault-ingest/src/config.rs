//! Serializable ingestion run configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(String),

    #[error("failed to parse config TOML: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Configuration for one ingestion run.
///
/// The default is deliberately conservative: the archive's stated guarantee
/// is zero invariant violations, so any rejection aborts the batch unless
/// the operator raises `max_rejection_ratio`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Abort the run if (parse failures + rejections) / total rows exceeds
    /// this ratio. Range [0, 1]. Default 0.0 (zero tolerance).
    #[serde(default)]
    pub max_rejection_ratio: f64,

    /// Wall-clock budget for the run. On expiry the batch aborts exactly as
    /// if validation had failed: full rollback, never a partial commit.
    #[serde(default)]
    pub time_budget_secs: Option<u64>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_rejection_ratio: 0.0,
            time_budget_secs: None,
        }
    }
}

impl IngestConfig {
    /// Load and validate a config from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Self =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.max_rejection_ratio) {
            return Err(ConfigError::Invalid(format!(
                "max_rejection_ratio must be within [0, 1], got {}",
                self.max_rejection_ratio
            )));
        }
        if self.time_budget_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "time_budget_secs must be positive when set".into(),
            ));
        }
        Ok(())
    }

    pub fn time_budget(&self) -> Option<Duration> {
        self.time_budget_secs.map(Duration::from_secs)
    }
}
