//! Configuration management for the fleetmirrord daemon.
//!
//! Handles loading, parsing, and validation of YAML configuration files
//! that define cloud credentials, endpoints, and polling behavior.

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::RwLock;

use crate::event::ConfigChangeType;

/// Main configuration structure for the fleetmirrord daemon.
///
/// Deserialized from the YAML configuration file.
///
/// # Example
///
/// ```yaml
/// version: 1
/// polling_interval: 10
/// api_key: "my-portal-api-key"
/// refresh_token: "pre-supplied-refresh-token"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Configuration version for compatibility checking.
    pub version: u8,

    /// Polling interval in seconds.
    #[serde(default = "defaults::polling_interval")]
    pub polling_interval: u16,

    /// Pre-supplied refresh token. When set, the startup sequence exchanges
    /// it instead of performing the sign-in flow.
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// API key for the sign-in exchange.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Authorization endpoint base URL.
    #[serde(default = "defaults::auth_url")]
    pub auth_url: String,

    /// Appliance API base URL, used until the session supplies a regional one.
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// Path of the persisted accessory cache. Defaults to a sibling of the
    /// config file.
    #[serde(default)]
    pub accessory_cache: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            polling_interval: defaults::polling_interval(),
            refresh_token: None,
            api_key: None,
            auth_url: defaults::auth_url(),
            base_url: defaults::base_url(),
            accessory_cache: None,
        }
    }
}

impl Config {
    /// Validates the configuration for consistency.
    ///
    /// The daemon needs either an API key (sign-in path) or a pre-supplied
    /// refresh token to ever obtain a session.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.polling_interval == 0 {
            anyhow::bail!("polling_interval must be at least 1 second");
        }

        let has_key = self.api_key.as_deref().is_some_and(|k| !k.is_empty());
        let has_token = self
            .refresh_token
            .as_deref()
            .is_some_and(|t| !t.is_empty());
        if !has_key && !has_token {
            anyhow::bail!("either api_key or refresh_token must be configured");
        }

        Ok(())
    }

    /// Names the sections that differ between `self` and `other` and cannot
    /// be applied without a restart (cloud collaborators are constructed once
    /// at startup).
    fn restart_sections(&self, other: &Config) -> Vec<String> {
        let mut sections = Vec::new();
        if self.auth_url != other.auth_url {
            sections.push("auth_url".to_string());
        }
        if self.base_url != other.base_url {
            sections.push("base_url".to_string());
        }
        if self.api_key != other.api_key {
            sections.push("api_key".to_string());
        }
        if self.accessory_cache != other.accessory_cache {
            sections.push("accessory_cache".to_string());
        }
        sections
    }
}

mod defaults {
    /// Default polling interval in seconds.
    pub fn polling_interval() -> u16 {
        10
    }

    pub fn auth_url() -> String {
        "https://auth.appliance-cloud.example.com".to_string()
    }

    pub fn base_url() -> String {
        "https://api.appliance-cloud.example.com".to_string()
    }
}

fn locate_config() -> Result<PathBuf> {
    // 1) ENV
    if let Ok(env_path) = env::var("FLEETMIRRORD_CONFIG") {
        return Ok(PathBuf::from(env_path));
    }

    // 2) XDG_CONFIG_HOME or $HOME/.config
    if let Some(mut cfg_dir) = env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|h| Path::new(&h).join(".config")))
    {
        cfg_dir.push("fleetmirrord/config.yml");
        if cfg_dir.exists() {
            return Ok(cfg_dir.clone());
        }
    }

    // 3) /etc
    let etc = Path::new("/etc/fleetmirrord/config.yml");
    if etc.exists() {
        return Ok(etc.to_path_buf());
    }

    anyhow::bail!("Configuration file not found in any standard location")
}

/// Configuration manager that handles both config data and file operations.
///
/// Provides a unified interface for loading, reloading, and managing
/// configuration without exposing the underlying file path to the rest of the
/// application.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: Arc<RwLock<Config>>,
    path: PathBuf,
}

impl ConfigManager {
    /// Creates a new ConfigManager with the given config and path.
    pub fn new(config: Config, path: PathBuf) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            path,
        }
    }

    /// Loads configuration from file or standard locations.
    ///
    /// Searches for configuration in the following order:
    /// 1. Provided path parameter
    /// 2. FLEETMIRRORD_CONFIG environment variable
    /// 3. XDG_CONFIG_HOME/fleetmirrord/config.yml or ~/.config/fleetmirrord/config.yml
    /// 4. /etc/fleetmirrord/config.yml
    pub async fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => locate_config().context("No configuration file found")?,
        };

        info!("Loading config from: {}", config_path.display());
        let config = Self::load_config_from_path(&config_path).await?;

        Ok(Self::new(config, config_path))
    }

    /// Gets a read-only reference to the current configuration.
    pub async fn get(&self) -> tokio::sync::RwLockReadGuard<'_, Config> {
        self.config.read().await
    }

    /// Returns the path to the configuration file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reloads configuration from the same file.
    ///
    /// This is useful for hot-reloading configuration changes.
    pub async fn reload(&self) -> Result<()> {
        info!("Reloading config from: {}", self.path.display());
        let new_config = Self::load_config_from_path(&self.path).await?;

        *self.config.write().await = new_config;
        info!("Configuration reloaded successfully");
        Ok(())
    }

    /// Re-reads the file and classifies the pending change.
    ///
    /// Changes to cloud endpoints, credentials, or the cache path require a
    /// restart because those collaborators are constructed at startup;
    /// everything else is hot-reloadable.
    pub async fn analyze_changes(&self) -> Result<ConfigChangeType> {
        let candidate = Self::load_config_from_path(&self.path).await?;
        let sections = self.config.read().await.restart_sections(&candidate);

        if sections.is_empty() {
            Ok(ConfigChangeType::HotReload)
        } else {
            Ok(ConfigChangeType::ColdRestart {
                changed_sections: sections,
            })
        }
    }

    /// Saves the current configuration to file.
    pub async fn save(&self) -> Result<()> {
        let config = self.config.read().await;
        self.save_to_path(&config, &self.path).await
    }

    /// Saves configuration to a specific path.
    pub async fn save_to_path(&self, config: &Config, path: &Path) -> Result<()> {
        let config_yaml =
            serde_yaml::to_string(config).context("Failed to serialize configuration")?;

        let tmp_path = path.with_extension("yml.tmp");
        fs::write(&tmp_path, config_yaml).with_context(|| {
            format!("Failed to write temporary config to {}", tmp_path.display())
        })?;

        fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to move config to {}", path.display()))?;

        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Clones the current configuration.
    ///
    /// Useful when you need to work with a snapshot of the config.
    pub async fn clone_config(&self) -> Config {
        self.config.read().await.clone()
    }

    /// Loads configuration from a specific path (internal helper).
    async fn load_config_from_path(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML in: {}", path.display()))?;

        if config.version != 1 {
            anyhow::bail!(
                "Unsupported config version {} in file: {}",
                config.version,
                path.display()
            );
        }

        config
            .validate()
            .with_context(|| format!("Configuration validation failed for: {}", path.display()))?;

        Ok(config)
    }
}
