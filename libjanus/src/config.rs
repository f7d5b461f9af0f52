//! Configuration management for Janus

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

pub const FEED_TOKEN_ENV: &str = "JANUS_FEED_TOKEN";
pub const STORE_TOKEN_ENV: &str = "JANUS_STORE_TOKEN";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub feed: FeedConfig,
    pub store: StoreConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub base_url: String,
    pub access_token: Option<String>,
    pub page_size: u32,
    pub timeout_secs: u64,
    /// Attempts per page fetch when the backend rate-limits us
    pub max_attempts: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://graph.facebook.com/v2.8".to_string(),
            access_token: None,
            page_size: 25,
            timeout_secs: 30,
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Http,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub base_url: String,
    pub access_token: Option<String>,
    pub sqlite_path: String,
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            base_url: "https://www.googleapis.com/fusiontables/v2".to_string(),
            access_token: None,
            sqlite_path: "~/.local/share/janus/tables.db".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Rows buffered by the table sink before a batch write
    pub batch_size: usize,
    /// Pause after a rejected batch, as a humantime string ("2s", "500ms")
    pub cooldown: String,
    pub cache_dir: String,
    /// Where stats sidecars go; the system temp dir when unset
    pub stats_dir: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 25,
            cooldown: "2s".to_string(),
            cache_dir: "./data".to_string(),
            stats_dir: None,
        }
    }
}

impl PipelineConfig {
    pub fn cooldown(&self) -> Result<Duration> {
        humantime::parse_duration(&self.cooldown).map_err(|e| {
            ConfigError::InvalidValue {
                field: "pipeline.cooldown".to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}

impl Config {
    /// Load configuration from the default location
    ///
    /// A missing file is not an error; defaults are used instead.
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        if !config_path.exists() {
            tracing::debug!(
                "No config file at {}, using defaults",
                config_path.display()
            );
            return Ok(Self::default().with_env_tokens());
        }
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config.with_env_tokens())
    }

    /// Fill missing tokens from the environment (and a `.env` file, if any)
    pub fn with_env_tokens(mut self) -> Self {
        let _ = dotenvy::dotenv();
        if self.feed.access_token.is_none() {
            self.feed.access_token = std::env::var(FEED_TOKEN_ENV).ok();
        }
        if self.store.access_token.is_none() {
            self.store.access_token = std::env::var(STORE_TOKEN_ENV).ok();
        }
        self
    }

    fn validate(&self) -> Result<()> {
        if self.pipeline.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.batch_size".to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        if self.feed.base_url.is_empty() {
            return Err(ConfigError::MissingField("feed.base_url".to_string()).into());
        }
        self.pipeline.cooldown()?;
        Ok(())
    }
}

/// Expand `~` in a configured path
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("JANUS_CONFIG") {
        return Ok(expand_path(&path));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("janus").join("config.toml"))
}
