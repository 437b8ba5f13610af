//! Cached access to the social-app API (channels, bans, primary addresses)

use super::JsonClient;
use crate::cache::{CacheAside, CacheKey, Namespace, TtlClass};
use crate::config::WarpcastConfig;
use crate::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Verified primary address of a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryAddress {
    pub fid: u64,
    pub protocol: String,
    pub address: String,
}

/// Channel summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,
    pub url: String,
    pub name: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// A fid banned from a channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BannedUser {
    pub fid: u64,
    pub channel_id: String,
    pub banned_at: i64,
}

#[derive(Debug, Deserialize, Serialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Debug, Deserialize, Serialize)]
struct AddressResult {
    address: Option<PrimaryAddress>,
}

#[derive(Debug, Deserialize, Serialize)]
struct ChannelResult {
    channel: Option<Channel>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct BansResult {
    #[serde(default)]
    banned_users: Vec<BannedUser>,
}

/// Social-app API with reads routed through the cache
#[derive(Clone)]
pub struct WarpcastApi {
    client: JsonClient,
    cache: CacheAside,
}

impl WarpcastApi {
    pub fn new(client: JsonClient, cache: CacheAside) -> Self {
        Self { client, cache }
    }

    pub fn from_config(config: &WarpcastConfig, cache: CacheAside) -> Result<Self> {
        let client = JsonClient::new(
            "warpcast",
            &config.base_url,
            Duration::from_secs(config.timeout_secs),
        )?;
        Ok(Self::new(client, cache))
    }

    async fn get_cached<T>(&self, uri: String, ttl: TtlClass) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        let key = CacheKey::new(Namespace::Warpcast, &uri);
        let envelope: Option<Envelope<T>> = self
            .cache
            .resolve_optional(&key, ttl, || self.client.get_json::<Envelope<T>>(&uri))
            .await?;
        Ok(envelope.map(|e| e.result))
    }

    pub async fn primary_address(&self, fid: u64) -> Result<Option<PrimaryAddress>> {
        let result: Option<AddressResult> = self
            .get_cached(
                format!("/fc/primary-address?fid={}&protocol=ethereum", fid),
                TtlClass::Medium,
            )
            .await?;
        Ok(result.and_then(|r| r.address))
    }

    pub async fn channel(&self, channel_id: &str) -> Result<Option<Channel>> {
        if channel_id.is_empty() {
            return Ok(None);
        }
        let result: Option<ChannelResult> = self
            .get_cached(
                format!("/v1/channel?channelId={}", urlencoding::encode(channel_id)),
                TtlClass::Long,
            )
            .await?;
        Ok(result.and_then(|r| r.channel))
    }

    /// Users banned from a channel; only the first page is served upstream
    pub async fn channel_bans(&self, channel_id: &str) -> Result<Vec<BannedUser>> {
        let result: Option<BansResult> = self
            .get_cached(
                format!("/fc/channel-bans?channelId={}", urlencoding::encode(channel_id)),
                TtlClass::Medium,
            )
            .await?;
        Ok(result.map(|r| r.banned_users).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_envelope() {
        let json = r#"{"result":{"channel":{"id":"nouns","url":"chain://eip155:1/erc721:0x9c8ff314c9bc7f6e59a9d9225fb22946427edc03","name":"Nouns","description":"","imageUrl":"https://example.com/n.png","leadFid":2,"followerCount":10}}}"#;
        let envelope: Envelope<ChannelResult> = serde_json::from_str(json).unwrap();
        let channel = envelope.result.channel.unwrap();
        assert_eq!(channel.id, "nouns");
        assert_eq!(channel.image_url.as_deref(), Some("https://example.com/n.png"));
    }

    #[test]
    fn test_bans_envelope() {
        let json = r#"{"result":{"bannedUsers":[{"fid":42,"channelId":"nouns","bannedAt":1700000000}]},"next":{"cursor":"abc"}}"#;
        let envelope: Envelope<BansResult> = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.result.banned_users[0].fid, 42);
    }
}
