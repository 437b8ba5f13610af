//! Configuration system
//!
//! Loads ~/.config/castgate/config.yaml (or a path given on the command line)
//! with support for:
//! - Hub and social-app API endpoints
//! - Relational store and cache service connections
//! - Retry policy and batch sizes
//! - Channel URL exceptions

mod gateway_config;

pub use gateway_config::{
    BatchConfig, CacheBackendKind, CacheServiceConfig, DatabaseConfig, GatewayConfig, HubConfig,
    RetrySettings, WarpcastConfig, ENV_CACHE_TOKEN, ENV_CACHE_URL, ENV_DATABASE_URL, ENV_HUB_URL,
};
