//! Tracking configuration
//!
//! Every component takes its settings as plain values at construction.
//! [`TrackingConfig`] only gathers them so a host can keep them in one
//! YAML document; durations are written in seconds.

use std::path::Path;
use std::time::Duration;

use serde::{de::Error as _, Deserialize, Deserializer};
use thiserror::Error;

use crate::connection::ConnectionConfig;
use crate::sources::AcquisitionRequest;
use crate::tracking::{FilterConfig, PublisherConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed on read the config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Settings of a whole tracking pipeline
#[derive(Clone, Debug, PartialEq, Deserialize, Default)]
#[serde(default)]
pub struct TrackingConfig {
    pub acquisition: AcquisitionRequest,
    pub filter: FilterConfig,
    pub connection: ConnectionConfig,
    pub publisher: PublisherConfig,
    /// REST fallback endpoint
    pub gateway_url: Option<String>,
}

impl TrackingConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        // an empty document means all defaults
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }

        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path)?;

        Self::from_yaml(&yaml)
    }
}

/// Deserialize a [`Duration`] written as (fractional) seconds
pub fn seconds<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
}
