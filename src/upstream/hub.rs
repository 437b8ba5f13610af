//! Cached access to a hub's HTTP API

use super::JsonClient;
use crate::cache::{
    CacheAside, CacheKey, Namespace, Page, PageOptions, PageRequest, ShortCircuit, TtlClass,
};
use crate::config::HubConfig;
use crate::mutuals::FollowGraph;
use crate::retry::with_retry;
use crate::Result;
use async_trait::async_trait;
use hub_types::{
    follow_target, user_data_value, Cast, Message, PaginatedMessages, SignerEvents,
    StorageLimits, UserDataType, UserNameProof, UserNameProofs,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const FOLLOWING_PAGE_SIZE: u32 = 1000;
pub const FOLLOWING_MAX_PAGES: u32 = 10;

/// Largest page the hub will serve
const MAX_PAGE_SIZE: u32 = 1000;

/// Profile fields served by the hub
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubUser {
    pub fid: u64,
    pub username: String,
    pub display_name: Option<String>,
    pub pfp_url: Option<String>,
    pub bio: Option<String>,
    pub url: Option<String>,
}

/// Where a signer key was registered on chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerProvenance {
    pub chain_id: u64,
    /// Unix seconds of the registering block
    pub timestamp: i64,
    pub human_readable_timestamp: String,
    pub txn_hash: String,
}

/// Hub API with every read routed through the cache
#[derive(Clone)]
pub struct HubApi {
    client: JsonClient,
    cache: CacheAside,
}

impl HubApi {
    pub fn new(client: JsonClient, cache: CacheAside) -> Self {
        Self { client, cache }
    }

    pub fn from_config(config: &HubConfig, cache: CacheAside) -> Result<Self> {
        let client = JsonClient::new(
            "hub",
            &config.base_url,
            Duration::from_secs(config.timeout_secs),
        )?;
        Ok(Self::new(client, cache))
    }

    pub fn cache(&self) -> &CacheAside {
        &self.cache
    }

    fn key(path: &str) -> CacheKey {
        CacheKey::new(Namespace::Hub, path)
    }

    async fn get_cached<T>(&self, uri: String, ttl: TtlClass) -> Result<Option<T>>
    where
        T: Serialize + serde::de::DeserializeOwned,
    {
        self.cache
            .resolve_optional(&Self::key(&uri), ttl, || self.client.get_json::<T>(&uri))
            .await
    }

    /// Fid registered for a username, if any
    pub async fn fid_by_username(&self, username: &str) -> Result<Option<u64>> {
        let uri = format!(
            "/v1/userNameProofByName?name={}",
            urlencoding::encode(&username.to_lowercase())
        );
        let proof: Option<UserNameProof> = self.get_cached(uri, TtlClass::Long).await?;
        Ok(proof.map(|p| p.fid))
    }

    /// Hub profile for `fid`; `None` when the fid has no username
    pub async fn user_by_fid(&self, fid: u64) -> Result<Option<HubUser>> {
        let proofs: Option<UserNameProofs> = self
            .get_cached(
                format!("/v1/userNameProofsByFid?fid={}&reverse=true", fid),
                TtlClass::Long,
            )
            .await?;
        let Some(username) = proofs
            .and_then(|p| p.proofs.into_iter().next())
            .map(|p| p.name)
            .filter(|n| !n.is_empty())
        else {
            return Ok(None);
        };

        let data: Option<PaginatedMessages> = self
            .get_cached(
                format!("/v1/userDataByFid?fid={}&reverse=true", fid),
                TtlClass::Medium,
            )
            .await?;
        let messages = data.map(|d| d.messages).unwrap_or_default();

        Ok(Some(HubUser {
            fid,
            username,
            display_name: user_data_value(&messages, UserDataType::Display),
            pfp_url: user_data_value(&messages, UserDataType::Pfp),
            bio: user_data_value(&messages, UserDataType::Bio),
            url: user_data_value(&messages, UserDataType::Url),
        }))
    }

    pub async fn username_by_fid(&self, fid: u64) -> Result<Option<String>> {
        Ok(self.user_by_fid(fid).await?.map(|u| u.username))
    }

    /// Fids that `fid` follows, in link order
    pub async fn following_by_fid(&self, fid: u64) -> Result<Vec<u64>> {
        let base = format!("/v1/linksByFid?fid={}&reverse=false&link_type=follow", fid);
        let options = PageOptions {
            page_size: FOLLOWING_PAGE_SIZE,
            max_pages: FOLLOWING_MAX_PAGES,
        };
        let messages: Vec<Message> = self
            .cache
            .collect_pages(&Self::key(&base), TtlClass::Feed, options, None, |request| {
                self.fetch_page(&base, request)
            })
            .await?;

        Ok(messages.iter().filter_map(follow_target).collect())
    }

    /// On-chain registration of `signer_key` for `fid`
    pub async fn signer_provenance(
        &self,
        fid: u64,
        signer_key: &str,
    ) -> Result<Option<SignerProvenance>> {
        let events: Option<SignerEvents> = self
            .get_cached(format!("/v1/onChainSignersByFid?fid={}", fid), TtlClass::Long)
            .await?;

        let signer_key = signer_key.to_lowercase();
        let event = events.and_then(|e| {
            e.events
                .into_iter()
                .find(|ev| ev.signer_event_body.key.to_lowercase() == signer_key)
        });

        Ok(event.map(|ev| SignerProvenance {
            chain_id: ev.chain_id,
            timestamp: ev.block_timestamp,
            human_readable_timestamp: chrono::DateTime::from_timestamp(ev.block_timestamp, 0)
                .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
                .unwrap_or_default(),
            txn_hash: ev.transaction_hash,
        }))
    }

    pub async fn storage_by_fid(&self, fid: u64) -> Result<Option<StorageLimits>> {
        self.get_cached(format!("/v1/storageLimitsByFid?fid={}", fid), TtlClass::Medium)
            .await
    }

    /// Single cast by id, cached under the rpc namespace
    pub async fn cast_by_id(&self, fid: u64, hash: &str) -> Result<Option<Cast>> {
        let hash = hash_with_prefix(hash);
        let key = CacheKey::new(Namespace::Rpc, format!("{}:{}", fid, hash));
        let uri = format!("/v1/castById?fid={}&hash={}", fid, hash);

        let (client, uri) = (&self.client, uri.as_str());
        self.cache
            .resolve_optional(&key, TtlClass::Long, || async move {
                let message: Message = client.get_json(uri).await?;
                Ok(Cast::try_from_message(&message)?)
            })
            .await
    }

    /// Latest casts by `fid`, newest first; uncached
    pub async fn casts_by_fid(&self, fid: u64, limit: usize) -> Result<Vec<Cast>> {
        let base = format!("/v1/castsByFid?fid={}&reverse=true", fid);
        let messages = self.walk_uncached(&base, limit).await?;
        Ok(to_casts(&messages))
    }

    /// Latest casts under a parent URL (channel), newest first; uncached
    pub async fn casts_by_parent(&self, url: &str, limit: usize) -> Result<Vec<Cast>> {
        let base = format!("/v1/castsByParent?url={}&reverse=true", urlencoding::encode(url));
        let messages = self.walk_uncached(&base, limit).await?;
        Ok(to_casts(&messages))
    }

    /// Search the newest `lookback` casts of `fid` for a hash prefix
    pub async fn find_cast_by_hash_prefix(
        &self,
        fid: u64,
        prefix: &str,
        lookback: usize,
    ) -> Result<Option<Cast>> {
        let base = format!("/v1/castsByFid?fid={}&reverse=true", fid);
        let options = PageOptions {
            page_size: MAX_PAGE_SIZE,
            max_pages: lookback.div_ceil(MAX_PAGE_SIZE as usize).max(1) as u32,
        };
        let predicate = ShortCircuit::HashPrefix(hash_with_prefix(prefix));

        let found: Vec<Message> = self
            .cache
            .collect_pages(
                &Self::key(&base),
                TtlClass::Feed,
                options,
                Some(&predicate),
                |request| self.fetch_page(&base, request),
            )
            .await?;

        Ok(to_casts(&found).into_iter().next())
    }

    fn fetch_page(
        &self,
        base: &str,
        request: PageRequest,
    ) -> impl std::future::Future<Output = Result<Page<Message>>> + Send + 'static {
        let client = self.client.clone();
        let uri = page_uri(base, &request);
        async move {
            let page: PaginatedMessages = client.get_json(&uri).await?;
            let next = page.continuation().map(str::to_string);
            Ok(Page::new(page.messages, next))
        }
    }

    async fn walk_uncached(&self, base: &str, limit: usize) -> Result<Vec<Message>> {
        let mut messages = Vec::new();
        let mut page_token: Option<String> = None;

        while messages.len() < limit {
            let request = PageRequest {
                page_size: (limit - messages.len()).min(MAX_PAGE_SIZE as usize) as u32,
                page_token: page_token.take(),
            };
            let page = with_retry(self.cache.policy(), base, || {
                self.fetch_page(base, request.clone())
            })
            .await?;

            if page.items.is_empty() {
                break;
            }
            messages.extend(page.items);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        messages.truncate(limit);
        Ok(messages)
    }
}

#[async_trait]
impl FollowGraph for HubApi {
    async fn following(&self, fid: u64) -> Result<Vec<u64>> {
        self.following_by_fid(fid).await
    }
}

fn page_uri(base: &str, request: &PageRequest) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    let mut uri = format!("{}{}pageSize={}", base, separator, request.page_size);
    if let Some(token) = &request.page_token {
        uri.push_str("&pageToken=");
        uri.push_str(&urlencoding::encode(token));
    }
    uri
}

/// Lowercase hash with a `0x` prefix
fn hash_with_prefix(hash: &str) -> String {
    let hash = hash.trim().to_lowercase();
    if hash.starts_with("0x") {
        hash
    } else {
        format!("0x{}", hash)
    }
}

fn to_casts(messages: &[Message]) -> Vec<Cast> {
    let (casts, errors) = Cast::collect_from(messages);
    for error in errors {
        tracing::warn!(error = %error, "Skipping malformed cast message");
    }
    casts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_uri() {
        let base = "/v1/castsByFid?fid=3&reverse=true";
        let first = PageRequest {
            page_size: 100,
            page_token: None,
        };
        assert_eq!(page_uri(base, &first), "/v1/castsByFid?fid=3&reverse=true&pageSize=100");

        let next = PageRequest {
            page_size: 100,
            page_token: Some("AuzO1V0D+w==".into()),
        };
        assert_eq!(
            page_uri(base, &next),
            "/v1/castsByFid?fid=3&reverse=true&pageSize=100&pageToken=AuzO1V0D%2Bw%3D%3D"
        );

        assert_eq!(page_uri("/v1/x", &first), "/v1/x?pageSize=100");
    }

    #[test]
    fn test_hash_with_prefix() {
        assert_eq!(hash_with_prefix("ABC123"), "0xabc123");
        assert_eq!(hash_with_prefix("0xAbC"), "0xabc");
    }
}
