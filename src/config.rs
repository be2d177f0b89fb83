//! Assistant configuration
//!
//! One explicit struct, loaded from TOML and passed into the components that
//! need it. Every field has a default, so partial files are accepted.

use crate::error::{ConfigError, ConfigResult};
use crate::performance::{ExecutorSettings, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const APP_DIR: &str = "mail-assistant";
const CONFIG_FILE: &str = "config.toml";

/// Worker pool section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub max_workers: usize,
    /// Bounded wait of idle workers, in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            poll_interval_ms: 1000,
        }
    }
}

/// Result cache section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_size: 100 }
    }
}

/// Mailbox fetch section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub default_folder: String,
    pub default_criteria: String,
    pub max_attempts: usize,
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            default_folder: "INBOX".to_string(),
            default_criteria: "ALL".to_string(),
            max_attempts: 3,
            retry_delay_ms: 250,
            max_retry_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub executor: ExecutorConfig,
    pub cache: CacheConfig,
    pub fetch: FetchConfig,
}

impl AssistantConfig {
    /// `<config dir>/mail-assistant/config.toml`
    pub fn default_path() -> ConfigResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load and validate a config file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: AssistantConfig = toml::from_str(&content)?;
        config.validate()?;

        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load a config file, falling back to defaults when it does not exist
    pub fn load_or_default(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            info!("No config found at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Write the config, creating parent directories
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_toml()?)?;

        debug!("Saved configuration to {}", path.display());
        Ok(())
    }

    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.executor.max_workers == 0 {
            return Err(ConfigError::invalid("executor.max_workers must be at least 1"));
        }
        if self.cache.max_size == 0 {
            return Err(ConfigError::invalid("cache.max_size must be at least 1"));
        }
        if self.fetch.max_attempts == 0 {
            return Err(ConfigError::invalid("fetch.max_attempts must be at least 1"));
        }
        if self.fetch.default_folder.trim().is_empty() {
            return Err(ConfigError::invalid("fetch.default_folder must not be empty"));
        }
        Ok(())
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            max_workers: self.executor.max_workers,
            poll_interval: Duration::from_millis(self.executor.poll_interval_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.fetch.max_attempts,
            base_delay: Duration::from_millis(self.fetch.retry_delay_ms),
            max_delay: Duration::from_millis(self.fetch.max_retry_delay_ms),
            ..RetryPolicy::default()
        }
    }
}
