//! Feed views over the store and the cached upstream APIs
//!
//! - [`FeedService::reverse_chron`]: stored cast index for a set of fids,
//!   newest first, hydrated from the hub.
//! - [`FeedService::channel_feed`]: latest casts in a channel with banned
//!   authors removed; cached results are served stale and revalidated in the
//!   background.
//! - [`Refresher`]: batch job that pulls recent casts into the store.

mod refresh;

pub use refresh::{RefreshStats, Refresher};

use crate::cache::{spawn_revalidation, CacheAside, CacheKey, Namespace, TtlClass};
use crate::hydration::{HydratedCast, Hydrator};
use crate::storage::{CastRow, Store};
use crate::upstream::Channel;
use crate::{GatewayError, Result};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

pub const FEED_DEFAULT_PAGE_SIZE: usize = 25;
pub const CASTS_DEFAULT_PAGE_SIZE: usize = 100;

/// How many of a user's newest casts are searched for a short hash
pub const URI_SEARCH_LOOKBACK: usize = 5000;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReverseChronFeed {
    pub casts: Vec<HydratedCast>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelFeed {
    pub casts: Vec<HydratedCast>,
    /// Served from cache while a refresh runs in the background
    pub stale: bool,
}

#[derive(Clone)]
pub struct FeedService {
    store: Arc<Store>,
    hydrator: Hydrator,
}

impl FeedService {
    pub fn new(store: Arc<Store>, hydrator: Hydrator) -> Self {
        Self { store, hydrator }
    }

    fn cache(&self) -> &CacheAside {
        self.hydrator.hub().cache()
    }

    /// Newest stored casts by any of `fids`, hydrated
    ///
    /// Rows whose cast no longer exists upstream, or fails to load, are
    /// dropped, so a page may hold fewer than `limit` casts while still
    /// carrying a cursor.
    pub async fn reverse_chron(
        &self,
        fids: &[u64],
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<ReverseChronFeed> {
        if fids.is_empty() {
            return Err(GatewayError::Precondition(
                "at least one fid is required".to_string(),
            ));
        }

        let page = self
            .store
            .get_reverse_chron_feed(fids, limit, cursor)
            .await?;

        let hub = self.hydrator.hub();
        let lookups = join_all(
            page.items
                .iter()
                .map(|row| hub.cast_by_id(row.fid, &row.hash)),
        )
        .await;

        let mut casts = Vec::with_capacity(lookups.len());
        for (row, lookup) in page.items.iter().zip(lookups) {
            match lookup {
                Ok(Some(cast)) => casts.push(cast),
                Ok(None) => tracing::debug!(hash = %row.hash, fid = row.fid, "Stored cast gone upstream"),
                Err(e) => tracing::warn!(
                    hash = %row.hash,
                    fid = row.fid,
                    error = %e,
                    "Skipping cast that could not be loaded"
                ),
            }
        }

        Ok(ReverseChronFeed {
            casts: self.hydrator.hydrate_casts(casts).await?,
            next_cursor: page.next_cursor,
        })
    }

    /// Latest casts in a channel, without banned authors
    pub async fn channel_feed(&self, channel_id: &str, limit: usize) -> Result<ChannelFeed> {
        let channel = self
            .hydrator
            .warpcast()
            .channel(channel_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("channel {}", channel_id)))?;

        let key = CacheKey::new(Namespace::ChannelFeed, format!("{}:{}", channel.id, limit));

        if let Some(casts) = self.cache().cached::<Vec<HydratedCast>>(&key).await {
            let service = self.clone();
            spawn_revalidation(self.cache().clone(), key, TtlClass::Feed, move || {
                let service = service.clone();
                let channel = channel.clone();
                async move { service.fetch_channel_feed(&channel, limit).await }
            });
            return Ok(ChannelFeed { casts, stale: true });
        }

        let casts = self
            .cache()
            .refresh(&key, TtlClass::Feed, || {
                self.fetch_channel_feed(&channel, limit)
            })
            .await?;
        Ok(ChannelFeed {
            casts,
            stale: false,
        })
    }

    async fn fetch_channel_feed(&self, channel: &Channel, limit: usize) -> Result<Vec<HydratedCast>> {
        let (bans, casts) = futures::future::try_join(
            self.hydrator.warpcast().channel_bans(&channel.id),
            self.hydrator.hub().casts_by_parent(&channel.url, limit),
        )
        .await?;

        let banned: HashSet<u64> = bans.iter().map(|b| b.fid).collect();
        let casts: Vec<_> = casts
            .into_iter()
            .filter(|c| !banned.contains(&c.fid))
            .collect();

        let rows: Vec<CastRow> = casts.iter().map(CastRow::from).collect();
        if let Err(e) = self.store.upsert_casts(&rows).await {
            tracing::warn!(channel = %channel.id, error = %e, "Could not index channel casts");
        }

        tracing::debug!(
            channel = %channel.id,
            casts = casts.len(),
            banned = banned.len(),
            "Fetched channel feed"
        );
        self.hydrator.hydrate_casts(casts).await
    }

    /// Cast whose stored hash starts with `hash`
    pub async fn cast_by_hash(&self, hash: &str) -> Result<Option<HydratedCast>> {
        let Some(row) = self.store.get_cast_by_short_hash(&with_hex_prefix(hash)).await? else {
            return Ok(None);
        };
        self.hydrate_one(row.fid, &row.hash).await
    }

    /// Cast addressed by an app link: author username plus short hash
    ///
    /// Falls back to searching the author's recent casts when the store has
    /// not indexed it.
    pub async fn cast_by_app_uri(
        &self,
        username: &str,
        short_hash: &str,
    ) -> Result<Option<HydratedCast>> {
        let hub = self.hydrator.hub();
        let Some(fid) = hub.fid_by_username(username).await? else {
            return Ok(None);
        };

        let short_hash = with_hex_prefix(short_hash);
        if let Some(row) = self.store.get_cast_by_short_hash(&short_hash).await? {
            if row.fid == fid {
                return self.hydrate_one(row.fid, &row.hash).await;
            }
        }

        match hub
            .find_cast_by_hash_prefix(fid, &short_hash, URI_SEARCH_LOOKBACK)
            .await?
        {
            Some(cast) => Ok(Some(self.hydrator.hydrate_cast(cast).await?)),
            None => Ok(None),
        }
    }

    async fn hydrate_one(&self, fid: u64, hash: &str) -> Result<Option<HydratedCast>> {
        match self.hydrator.hub().cast_by_id(fid, hash).await? {
            Some(cast) => Ok(Some(self.hydrator.hydrate_cast(cast).await?)),
            None => Ok(None),
        }
    }
}

fn with_hex_prefix(hash: &str) -> String {
    let hash = hash.trim().to_ascii_lowercase();
    if hash.starts_with("0x") {
        hash
    } else {
        format!("0x{}", hash)
    }
}
