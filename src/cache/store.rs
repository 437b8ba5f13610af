//! Cache store seam, TTL classes and key namespaces

use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Key/value store with per-entry expiry
///
/// Values are serialized JSON. A store is never authoritative: a missing or
/// failing store must always be recoverable by refetching upstream.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Raw value for `key`, or `None` when absent or expired
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Atomically replace the value under `key`
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Drop `key` if present
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Expiry tier chosen per data volatility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TtlClass {
    /// Live status (60s)
    Short,
    /// Feed pages (2 minutes)
    Feed,
    /// Profiles, storage, addresses (12 hours)
    Medium,
    /// Username/fid mappings, signer provenance, single casts (7 days)
    Long,
}

impl TtlClass {
    pub fn as_secs(self) -> u64 {
        match self {
            TtlClass::Short => 60,
            TtlClass::Feed => 120,
            TtlClass::Medium => 12 * 60 * 60,
            TtlClass::Long => 7 * 24 * 60 * 60,
        }
    }

    pub fn duration(self) -> Duration {
        Duration::from_secs(self.as_secs())
    }
}

/// Upstream a cache entry was fetched from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Hub,
    Warpcast,
    ChannelFeed,
    /// Single-cast lookups by (fid, hash)
    Rpc,
}

impl Namespace {
    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::Hub => "hub",
            Namespace::Warpcast => "warpcast",
            Namespace::ChannelFeed => "channelFeed",
            Namespace::Rpc => "grpc",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully qualified cache key, `<namespace>:<path>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: Namespace,
    key: String,
}

impl CacheKey {
    pub fn new(namespace: Namespace, path: impl AsRef<str>) -> Self {
        Self {
            namespace,
            key: format!("{}:{}", namespace.as_str(), path.as_ref()),
        }
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}
