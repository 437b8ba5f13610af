//! Background revalidation of served cache entries

use super::resolver::CacheAside;
use super::store::{CacheKey, TtlClass};
use crate::Result;
use serde::Serialize;
use std::future::Future;
use tokio::task::JoinHandle;

/// Refetch `key` on a detached task and overwrite the cache entry
///
/// The caller is not expected to await the handle; failures are logged and
/// only affect future reads.
pub fn spawn_revalidation<T, F, Fut>(
    cache: CacheAside,
    key: CacheKey,
    ttl: TtlClass,
    fetch: F,
) -> JoinHandle<()>
where
    T: Serialize + Send + Sync + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    tokio::spawn(async move {
        match cache.refresh(&key, ttl, fetch).await {
            Ok(_) => tracing::debug!(key = %key, "Revalidated cache entry"),
            Err(e) => tracing::warn!(key = %key, error = %e, "Background revalidation failed"),
        }
    })
}
