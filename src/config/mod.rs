//! Configuration module for the explorer pool
//!
//! This module handles pool configuration:
//! - Scheduling knobs (default priorities, dispatch floor)
//! - Texts of the synthetic error chunks
//! - Logging settings for binaries
//!
//! # Config Location
//!
//! The default config file lives in the platform config directory under
//! `explorer-pool/pool.toml`:
//!
//! - **Linux**: `~/.config/explorer-pool/pool.toml`
//! - **macOS**: `~/Library/Application Support/explorer-pool/pool.toml`
//! - **Windows**: `%APPDATA%\explorer-pool\pool.toml`
//!
//! # Example
//!
//! ```ignore
//! use explorer_pool::config::PoolConfig;
//!
//! let mut config = PoolConfig::load_or_default();
//! config.scheduler.dispatch_floor = Some(0);
//! config.save("pool.toml")?;
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{PoolError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "explorer-pool";

/// Config filename
pub const CONFIG_FILE: &str = "pool.toml";

/// Get the default config file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID).join(CONFIG_FILE))
}

/// Complete pool configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Scheduling settings
    pub scheduler: SchedulerSettings,

    /// Synthetic error texts
    pub messages: MessageSettings,

    /// Logging settings
    pub logging: LoggingSettings,
}

impl PoolConfig {
    /// Parse a config from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| PoolError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PoolError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load the config from the default location, returning defaults on any error
    pub fn load_or_default() -> Self {
        let Some(path) = default_config_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load pool config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the config as TOML, creating parent directories as needed
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                PoolError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| PoolError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| PoolError::Config(format!("Failed to write config: {}", e)))
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.wake_capacity == 0 {
            return Err(PoolError::Config(
                "scheduler.wake_capacity must be at least 1".to_string(),
            ));
        }
        if !self.scheduler.is_dispatchable(self.scheduler.default_priority) {
            tracing::warn!(
                "default_priority {} is parked by dispatch_floor {:?}",
                self.scheduler.default_priority,
                self.scheduler.dispatch_floor
            );
        }
        Ok(())
    }
}
