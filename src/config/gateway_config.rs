//! Gateway configuration file handling
//!
//! Loads an optional YAML file, then lets the environment override the
//! connection settings. Required secrets are checked when first needed, not at
//! load time, so commands that never touch the database do not demand one.

use crate::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_CACHE_URL: &str = "CACHE_REST_URL";
pub const ENV_CACHE_TOKEN: &str = "CACHE_REST_TOKEN";
pub const ENV_HUB_URL: &str = "HUB_URL";

/// Protocol hub (HTTP API) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_hub_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

fn default_hub_url() -> String {
    "https://pop.farcaster.xyz:3381".to_string()
}

fn default_request_timeout() -> u64 {
    15
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            base_url: default_hub_url(),
            timeout_secs: default_request_timeout(),
        }
    }
}

/// Social-app API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarpcastConfig {
    #[serde(default = "default_warpcast_url")]
    pub base_url: String,

    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

fn default_warpcast_url() -> String {
    "https://api.farcaster.xyz".to_string()
}

impl Default for WarpcastConfig {
    fn default() -> Self {
        Self {
            base_url: default_warpcast_url(),
            timeout_secs: default_request_timeout(),
        }
    }
}

/// Relational store settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite path, `sqlite://` URL or `:memory:`
    #[serde(default)]
    pub url: Option<String>,
}

/// Which cache service backs the resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackendKind {
    /// Redis over REST
    #[default]
    Rest,
    /// Local SQLite file
    Sqlite,
}

/// Cache service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheServiceConfig {
    #[serde(default)]
    pub backend: CacheBackendKind,

    /// REST endpoint of the cache service
    #[serde(default)]
    pub url: Option<String>,

    /// Bearer token for the cache service
    #[serde(default)]
    pub token: Option<String>,

    /// SQLite cache file, used by the `sqlite` backend
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
}

fn default_cache_path() -> PathBuf {
    let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(".config");
    path.push("castgate");
    path.push("cache.db");
    path
}

impl Default for CacheServiceConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::default(),
            url: None,
            token: None,
            path: default_cache_path(),
        }
    }
}

/// Retry settings for upstream calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Total retry budget; `None` disables the deadline
    #[serde(default = "default_max_elapsed_ms")]
    pub max_elapsed_ms: Option<u64>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1
}

fn default_multiplier() -> f64 {
    10.0
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_max_elapsed_ms() -> Option<u64> {
    Some(30_000)
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
            max_elapsed_ms: default_max_elapsed_ms(),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> crate::retry::RetryPolicy {
        crate::retry::RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.multiplier,
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            max_elapsed: self.max_elapsed_ms.map(Duration::from_millis),
        }
    }
}

/// Batch sizes for bulk jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Rows per INSERT statement
    #[serde(default = "default_upsert_chunk_size")]
    pub upsert_chunk_size: usize,

    /// Fids fetched concurrently per refresh group
    #[serde(default = "default_refresh_batch_size")]
    pub refresh_batch_size: usize,

    /// Casts requested per fid during refresh
    #[serde(default = "default_refresh_casts_size")]
    pub refresh_casts_size: u32,

    /// Follows of a username included in a refresh
    #[serde(default = "default_max_followers")]
    pub max_followers: usize,
}

fn default_upsert_chunk_size() -> usize {
    500
}

fn default_refresh_batch_size() -> usize {
    20
}

fn default_refresh_casts_size() -> u32 {
    500
}

fn default_max_followers() -> usize {
    100
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            upsert_chunk_size: default_upsert_chunk_size(),
            refresh_batch_size: default_refresh_batch_size(),
            refresh_casts_size: default_refresh_casts_size(),
            max_followers: default_max_followers(),
        }
    }
}

/// castgate configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub hub: HubConfig,

    #[serde(default)]
    pub warpcast: WarpcastConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub cache: CacheServiceConfig,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub batch: BatchConfig,

    /// Channel URLs that do not follow the usual URL layouts, mapped to their id
    #[serde(default)]
    pub channel_exceptions: HashMap<String, String>,
}

impl GatewayConfig {
    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(GatewayError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading castgate configuration");

        let content = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;

        tracing::debug!(
            hub = %config.hub.base_url,
            cache_backend = ?config.cache.backend,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Load from `path` if given, otherwise start from defaults; then apply the environment
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Override connection settings from environment-style lookups
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_DATABASE_URL) {
            self.database.url = Some(url);
        }
        if let Some(url) = lookup(ENV_CACHE_URL) {
            self.cache.url = Some(url);
        }
        if let Some(token) = lookup(ENV_CACHE_TOKEN) {
            self.cache.token = Some(token);
        }
        if let Some(url) = lookup(ENV_HUB_URL) {
            self.hub.base_url = url;
        }
    }

    /// Reject values that would make the batch jobs misbehave
    pub fn validate(&self) -> Result<()> {
        if self.batch.upsert_chunk_size == 0 {
            return Err(GatewayError::Config(
                "batch.upsert_chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.batch.refresh_batch_size == 0 {
            return Err(GatewayError::Config(
                "batch.refresh_batch_size must be greater than zero".to_string(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(GatewayError::Config(
                "retry.multiplier must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }

    /// Database URL, or a descriptive error naming the variable to set
    pub fn require_database_url(&self) -> Result<&str> {
        self.database
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| GatewayError::Config(format!("{} is not set", ENV_DATABASE_URL)))
    }

    /// Cache REST URL and token, or a descriptive error naming what is missing
    pub fn require_cache_credentials(&self) -> Result<(&str, &str)> {
        let url = self
            .cache
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| GatewayError::Config(format!("{} is not set", ENV_CACHE_URL)))?;
        let token = self
            .cache
            .token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| GatewayError::Config(format!("{} is not set", ENV_CACHE_TOKEN)))?;
        Ok((url, token))
    }

    /// Get the default config path (~/.config/castgate/config.yaml)
    pub fn default_path() -> PathBuf {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".config");
        path.push("castgate");
        path.push("config.yaml");
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.batch.upsert_chunk_size, 500);
        assert_eq!(config.batch.refresh_batch_size, 20);
        assert_eq!(config.hub.base_url, "https://pop.farcaster.xyz:3381");
        assert_eq!(config.cache.backend, CacheBackendKind::Rest);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            r#"
hub:
  base_url: http://localhost:2281
cache:
  backend: sqlite
  path: /tmp/castgate-cache.db
batch:
  upsert_chunk_size: 50
channel_exceptions:
  "chain://eip155:1/erc721:0xabc": nouns
"#,
        )
        .unwrap();

        let config = GatewayConfig::load(&path).unwrap();
        assert_eq!(config.hub.base_url, "http://localhost:2281");
        assert_eq!(config.cache.backend, CacheBackendKind::Sqlite);
        assert_eq!(config.batch.upsert_chunk_size, 50);
        assert_eq!(config.batch.refresh_batch_size, 20);
        assert_eq!(
            config.channel_exceptions.get("chain://eip155:1/erc721:0xabc"),
            Some(&"nouns".to_string())
        );
    }

    #[test]
    fn test_load_missing_file() {
        let err = GatewayConfig::load("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let mut config = GatewayConfig::default();
        config.batch.upsert_chunk_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = GatewayConfig::default();
        config.apply_env(|key| match key {
            ENV_DATABASE_URL => Some(":memory:".to_string()),
            ENV_CACHE_URL => Some("https://cache.example".to_string()),
            ENV_CACHE_TOKEN => Some("secret".to_string()),
            _ => None,
        });

        assert_eq!(config.require_database_url().unwrap(), ":memory:");
        assert_eq!(
            config.require_cache_credentials().unwrap(),
            ("https://cache.example", "secret")
        );
    }

    #[test]
    fn test_missing_secrets_are_descriptive() {
        let config = GatewayConfig::default();

        let err = config.require_database_url().unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL is not set"));

        let err = config.require_cache_credentials().unwrap_err();
        assert!(err.to_string().contains("CACHE_REST_URL is not set"));
    }
}
