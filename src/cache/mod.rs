//! Cache layer for upstream reads
//!
//! A [`CacheStore`] holds transient JSON copies of upstream payloads under
//! namespaced keys. [`CacheAside`] resolves single values and paginated lists
//! through it, and [`spawn_revalidation`] refreshes served entries in the
//! background.

mod resolver;
mod rest;
mod revalidate;
mod sqlite;
mod store;

pub use resolver::{CacheAside, Page, PageOptions, PageRequest, ShortCircuit};
pub use rest::RestCacheStore;
pub use revalidate::spawn_revalidation;
pub use sqlite::{CacheStats, SqliteCacheConfig, SqliteCacheStore};
pub use store::{CacheKey, CacheStore, Namespace, TtlClass};

use crate::config::{CacheBackendKind, GatewayConfig};
use crate::Result;
use std::sync::Arc;

/// Open the cache store selected in configuration
pub fn open_store(config: &GatewayConfig) -> Result<Arc<dyn CacheStore>> {
    match config.cache.backend {
        CacheBackendKind::Rest => Ok(Arc::new(RestCacheStore::from_config(config)?)),
        CacheBackendKind::Sqlite => Ok(Arc::new(SqliteCacheStore::new(SqliteCacheConfig {
            path: config.cache.path.clone(),
            ..Default::default()
        })?)),
    }
}
