//! Redis-over-REST cache store
//!
//! Speaks the Upstash REST dialect: each command is POSTed as a JSON array
//! to the base URL with a bearer token, and the reply is `{"result": ..}` or
//! `{"error": ".."}`.

use super::store::CacheStore;
use crate::config::GatewayConfig;
use crate::{GatewayError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Remote cache service client
#[derive(Debug, Clone)]
pub struct RestCacheStore {
    url: String,
    token: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CommandReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl RestCacheStore {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("castgate/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            url: url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client,
        })
    }

    /// Build from configuration, failing when the URL or token is missing
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let (url, token) = config.require_cache_credentials()?;
        Self::new(url, token)
    }

    async fn command(&self, args: &[&str]) -> Result<Value> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(args)
            .send()
            .await
            .map_err(|e| GatewayError::Cache(format!("{} request failed: {}", args[0], e)))?;

        let status = response.status();
        let reply: CommandReply = response.json().await.map_err(|e| {
            GatewayError::Cache(format!("{} returned unreadable reply ({}): {}", args[0], status, e))
        })?;

        if let Some(error) = reply.error {
            return Err(GatewayError::Cache(format!("{} failed: {}", args[0], error)));
        }
        if !status.is_success() {
            return Err(GatewayError::Cache(format!("{} failed with {}", args[0], status)));
        }

        Ok(reply.result.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl CacheStore for RestCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.command(&["GET", key]).await? {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s)),
            other => Ok(Some(other.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let secs = ttl.as_secs().max(1).to_string();
        self.command(&["SET", key, value, "EX", &secs]).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.command(&["DEL", key]).await?;
        Ok(())
    }
}
