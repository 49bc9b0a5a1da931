//! Configuration management.

use crate::error::{FleetError, Result};
use crate::paths;
use crate::types::{DeploymentConfig, PlacementStrategy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A host registered at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEntry {
    pub id: String,
    pub endpoint: String,
}

/// Persistent configuration for Flotilla.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub ping_timeout_secs: u64,
    pub operation_timeout_secs: u64,
    pub stop_timeout_secs: u64,
    pub default_strategy: PlacementStrategy,
    pub db_path: String,
    pub metrics_port: Option<u16>,
    pub hosts: Vec<HostEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            ping_timeout_secs: 5,
            operation_timeout_secs: 120,
            stop_timeout_secs: 10,
            default_strategy: PlacementStrategy::Auto,
            db_path: paths::db_path().to_string_lossy().to_string(),
            metrics_port: None,
            hosts: Vec::new(),
        }
    }
}

impl From<&Config> for DeploymentConfig {
    /// Deployment settings for stacks submitted without their own.
    fn from(config: &Config) -> Self {
        DeploymentConfig::with_strategy(config.default_strategy)
    }
}

impl Config {
    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        paths::config_dir().join("config.json")
    }

    /// Load configuration from the default location.
    pub fn load() -> Result<Self> {
        Self::load_from(Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if it does not exist.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| FleetError::InvalidConfig {
            reason: format!("Failed to read config: {}", e),
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| FleetError::InvalidConfig {
            reason: format!("Failed to parse config: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(Self::config_path())
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| FleetError::IoError { path: parent.to_path_buf(), source: e })?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| FleetError::InvalidConfig {
            reason: format!("Failed to serialize config: {}", e),
        })?;
        std::fs::write(path, content)
            .map_err(|e| FleetError::IoError { path: path.to_path_buf(), source: e })
    }

    fn validate(&self) -> Result<()> {
        if self.ping_timeout_secs == 0 || self.operation_timeout_secs == 0 {
            return Err(FleetError::InvalidConfig {
                reason: "Timeouts must be at least one second".to_string(),
            });
        }
        let mut ids = std::collections::HashSet::new();
        for host in &self.hosts {
            if !ids.insert(host.id.as_str()) {
                return Err(FleetError::InvalidConfig {
                    reason: format!("Host '{}' is listed more than once", host.id),
                });
            }
        }
        Ok(())
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}
