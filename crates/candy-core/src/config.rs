//! TOML-loadable settings.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::DeviceFilter;
use crate::protocol::constants::{
    DEFAULT_PACKET_TIMEOUT_MS, DEFAULT_POLL_INTERVAL_MS, INSTANCE_TAG,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Settings shared by discovery, the session and the transfer executor.
///
/// Every field has a default, so a partial (or empty) file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandyConfig {
    /// Which devices discovery reports.
    pub filter: DeviceFilter,
    /// Per-packet write timeout.
    pub packet_timeout_ms: u64,
    /// Discovery poll interval.
    pub poll_interval_ms: u64,
    /// Tag used in synthesized `MI_NN#<tag>` identifier segments.
    pub instance_tag: u8,
    /// Extra open attempts after a retryable failure.
    pub open_retries: u32,
    /// Pause between open attempts.
    pub retry_delay_ms: u64,
}

impl Default for CandyConfig {
    fn default() -> Self {
        Self {
            filter: DeviceFilter::default(),
            packet_timeout_ms: DEFAULT_PACKET_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            instance_tag: INSTANCE_TAG,
            open_retries: 0,
            retry_delay_ms: 500,
        }
    }
}

impl CandyConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: CandyConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn packet_timeout(&self) -> Duration {
        Duration::from_millis(self.packet_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}
