//! Cache-aside resolver and paginated collector
//!
//! Every upstream read goes through [`CacheAside`]: a hit is returned without
//! touching upstream, a miss runs the fetch under the retry policy and writes
//! the result back. The cache is best-effort throughout; read failures count
//! as misses and write failures are logged and dropped.

use super::store::{CacheKey, CacheStore, TtlClass};
use crate::retry::{with_retry, RetryPolicy};
use crate::{metrics, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

/// Page size and page cap for one collector call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageOptions {
    pub page_size: u32,
    pub max_pages: u32,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_pages: 10,
        }
    }
}

/// What the page fetcher is asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub page_size: u32,
    /// Continuation token from the previous page; `None` for the first page
    pub page_token: Option<String>,
}

/// One page of upstream results
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next_page_token: Option<String>) -> Self {
        Self {
            items,
            next_page_token: next_page_token.filter(|t| !t.is_empty()),
        }
    }
}

/// Early-exit predicate for [`CacheAside::collect_pages`]
#[derive(Debug, Clone, PartialEq)]
pub enum ShortCircuit {
    /// The item's `hash` field starts with this prefix
    HashPrefix(String),
    /// A top-level field equals this JSON value
    FieldEquals {
        field: String,
        value: serde_json::Value,
    },
}

impl ShortCircuit {
    /// Whether `item` satisfies the predicate
    pub fn matches<T: Serialize>(&self, item: &T) -> bool {
        let Ok(value) = serde_json::to_value(item) else {
            return false;
        };
        match self {
            ShortCircuit::HashPrefix(prefix) => value
                .get("hash")
                .and_then(|h| h.as_str())
                .map(|h| !prefix.is_empty() && h.starts_with(prefix.as_str()))
                .unwrap_or(false),
            ShortCircuit::FieldEquals { field, value: expected } => {
                value.get(field.as_str()) == Some(expected)
            }
        }
    }
}

/// Cache-aside access to upstream data
#[derive(Clone)]
pub struct CacheAside {
    store: Arc<dyn CacheStore>,
    policy: RetryPolicy,
}

impl CacheAside {
    pub fn new(store: Arc<dyn CacheStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Cached value for `key` without fetching
    pub async fn cached<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        self.read(key).await
    }

    /// Return the cached value for `key`, or fetch, cache and return it
    pub async fn resolve<T, F, Fut>(&self, key: &CacheKey, ttl: TtlClass, fetch: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.read::<T>(key).await {
            return Ok(value);
        }
        self.refresh(key, ttl, fetch).await
    }

    /// Fetch unconditionally and overwrite the cached value
    pub async fn refresh<T, F, Fut>(&self, key: &CacheKey, ttl: TtlClass, fetch: F) -> Result<T>
    where
        T: Serialize,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let value = with_retry(&self.policy, key.as_str(), fetch).await?;
        self.write(key, ttl, &value).await;
        Ok(value)
    }

    /// Like [`resolve`](Self::resolve), but a not-found fetch is cached as a
    /// negative result and returned as `None`
    pub async fn resolve_optional<T, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: TtlClass,
        fetch: F,
    ) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(cached) = self.read::<Option<T>>(key).await {
            return Ok(cached);
        }

        match with_retry(&self.policy, key.as_str(), fetch).await {
            Ok(value) => {
                let value = Some(value);
                self.write(key, ttl, &value).await;
                Ok(value)
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!(key = %key, "Caching negative result");
                self.write(key, ttl, &None::<T>).await;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Walk a cursor-paginated upstream and return every item
    ///
    /// Stops at a missing continuation token or after `options.max_pages`,
    /// caching the complete list under `key`. A `max_pages` of zero fetches
    /// nothing and touches no cache entry. An empty page also stops the
    /// walk, returning what was gathered without caching it. With a
    /// `short_circuit`, the cache is neither read nor written, and collection
    /// stops at the first matching item, which is returned alone; no match
    /// yields an empty list.
    pub async fn collect_pages<T, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: TtlClass,
        options: PageOptions,
        short_circuit: Option<&ShortCircuit>,
        mut fetch_page: F,
    ) -> Result<Vec<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut(PageRequest) -> Fut,
        Fut: Future<Output = Result<Page<T>>>,
    {
        if options.max_pages == 0 {
            tracing::debug!(key = %key, "No pages requested");
            return Ok(Vec::new());
        }

        if short_circuit.is_none() {
            if let Some(items) = self.read::<Vec<T>>(key).await {
                return Ok(items);
            }
        }

        let mut items: Vec<T> = Vec::new();
        let mut page_token: Option<String> = None;

        for page_number in 0..options.max_pages {
            let request = PageRequest {
                page_size: options.page_size,
                page_token: page_token.take(),
            };
            let page = with_retry(&self.policy, key.as_str(), || fetch_page(request.clone())).await?;

            tracing::trace!(
                key = %key,
                page = page_number,
                items = page.items.len(),
                "Fetched page"
            );

            if page.items.is_empty() {
                tracing::debug!(key = %key, page = page_number, "Empty page, not caching");
                return Ok(items);
            }

            if let Some(predicate) = short_circuit {
                if let Some(found) = page.items.into_iter().find(|item| predicate.matches(item)) {
                    tracing::debug!(key = %key, page = page_number, "Short-circuit matched");
                    return Ok(vec![found]);
                }
            } else {
                items.extend(page.items);
            }

            page_token = page.next_page_token.filter(|t| !t.is_empty());
            if page_token.is_none() {
                break;
            }
        }

        if short_circuit.is_some() {
            return Ok(Vec::new());
        }

        self.write(key, ttl, &items).await;
        Ok(items)
    }

    async fn read<V: DeserializeOwned>(&self, key: &CacheKey) -> Option<V> {
        let namespace = key.namespace().as_str();
        match self.store.get(key.as_str()).await {
            Ok(Some(raw)) => match serde_json::from_str::<V>(&raw) {
                Ok(value) => {
                    metrics::record_cache_hit(namespace);
                    tracing::trace!(key = %key, "Cache hit");
                    Some(value)
                }
                Err(e) => {
                    metrics::record_cache_error(namespace);
                    tracing::warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                    None
                }
            },
            Ok(None) => {
                metrics::record_cache_miss(namespace);
                None
            }
            Err(e) => {
                metrics::record_cache_error(namespace);
                tracing::warn!(key = %key, error = %e, "Cache read failed, fetching upstream");
                None
            }
        }
    }

    async fn write<V: Serialize + ?Sized>(&self, key: &CacheKey, ttl: TtlClass, value: &V) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Could not serialize value for cache");
                return;
            }
        };
        if let Err(e) = self.store.set(key.as_str(), &raw, ttl.duration()).await {
            metrics::record_cache_error(key.namespace().as_str());
            tracing::warn!(key = %key, error = %e, "Cache write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Namespace, SqliteCacheStore};
    use crate::GatewayError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn resolver() -> CacheAside {
        let store = Arc::new(SqliteCacheStore::in_memory().unwrap());
        CacheAside::new(store, RetryPolicy::default())
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        hash: String,
        n: u32,
    }

    fn item(n: u32) -> Item {
        Item {
            hash: format!("0x{:02x}ff", n),
            n,
        }
    }

    #[tokio::test]
    async fn test_hit_skips_upstream() {
        let cache = resolver();
        let key = CacheKey::new(Namespace::Hub, "/v1/test");
        let calls = &AtomicUsize::new(0);

        for _ in 0..3 {
            let value: u64 = cache
                .resolve(&key, TtlClass::Long, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                })
                .await
                .unwrap();
            assert_eq!(value, 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let cache = resolver();
        let key = CacheKey::new(Namespace::Hub, "/v1/flaky");
        let calls = &AtomicUsize::new(0);

        let value: String = cache
            .resolve(&key, TtlClass::Short, || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(GatewayError::Upstream {
                        status: 503,
                        message: "busy".into(),
                    })
                } else {
                    Ok("ok".to_string())
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_not_found_is_cached_negative() {
        let cache = resolver();
        let key = CacheKey::new(Namespace::Warpcast, "/v1/channel?channelId=nope");
        let calls = &AtomicUsize::new(0);

        for _ in 0..2 {
            let value: Option<String> = cache
                .resolve_optional(&key, TtlClass::Long, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(GatewayError::NotFound("channel".into()))
                })
                .await
                .unwrap();
            assert_eq!(value, None);
        }
        // Not retried, and the second call was a negative hit
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            cache.store().get(key.as_str()).await.unwrap().as_deref(),
            Some("null")
        );
    }

    #[tokio::test]
    async fn test_fetch_error_is_not_cached() {
        let cache = resolver();
        let key = CacheKey::new(Namespace::Hub, "/v1/bad");

        let result: Result<u64> = cache
            .resolve(&key, TtlClass::Long, || async {
                Err(GatewayError::Upstream {
                    status: 400,
                    message: "bad request".into(),
                })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(cache.store().get(key.as_str()).await.unwrap(), None);
    }

    /// Store that is always unavailable
    struct ReadOnlyStore;

    #[async_trait::async_trait]
    impl CacheStore for ReadOnlyStore {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(GatewayError::Cache("down".into()))
        }
        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
            Err(GatewayError::Cache("down".into()))
        }
        async fn delete(&self, _key: &str) -> Result<()> {
            Err(GatewayError::Cache("down".into()))
        }
    }

    #[tokio::test]
    async fn test_cache_outage_is_not_fatal() {
        let cache = CacheAside::new(Arc::new(ReadOnlyStore), RetryPolicy::none());
        let key = CacheKey::new(Namespace::Hub, "/v1/any");

        let value: u64 = cache
            .resolve(&key, TtlClass::Medium, || async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    fn pages() -> Vec<Page<Item>> {
        vec![
            Page::new(vec![item(1), item(2)], Some("p2".into())),
            Page::new(vec![item(3), item(4)], Some("p3".into())),
            Page::new(vec![item(5)], Some(String::new())),
        ]
    }

    async fn collect(
        cache: &CacheAside,
        key: &CacheKey,
        options: PageOptions,
        short_circuit: Option<&ShortCircuit>,
        calls: &AtomicUsize,
    ) -> Vec<Item> {
        let pages = pages();
        cache
            .collect_pages(key, TtlClass::Feed, options, short_circuit, |request| {
                calls.fetch_add(1, Ordering::SeqCst);
                let index = match request.page_token.as_deref() {
                    None => 0,
                    Some("p2") => 1,
                    Some("p3") => 2,
                    Some(other) => panic!("unexpected token {other}"),
                };
                let page = pages[index].clone();
                async move { Ok(page) }
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_collect_all_pages_and_cache() {
        let cache = resolver();
        let key = CacheKey::new(Namespace::Hub, "/v1/castsByFid?fid=1");
        let calls = AtomicUsize::new(0);

        let items = collect(&cache, &key, PageOptions::default(), None, &calls).await;
        assert_eq!(items.iter().map(|i| i.n).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
        // Empty token on the last page ends pagination
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let again = collect(&cache, &key, PageOptions::default(), None, &calls).await;
        assert_eq!(again, items);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_collect_respects_max_pages() {
        let cache = resolver();
        let key = CacheKey::new(Namespace::Hub, "/v1/castsByFid?fid=2");
        let calls = AtomicUsize::new(0);
        let options = PageOptions {
            page_size: 2,
            max_pages: 2,
        };

        let items = collect(&cache, &key, options, None, &calls).await;
        assert_eq!(items.len(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_page_is_not_cached() {
        let cache = resolver();
        let key = CacheKey::new(Namespace::Hub, "/v1/linksByFid?fid=5");
        let calls = &AtomicUsize::new(0);

        for expected_calls in [2, 4] {
            let items: Vec<Item> = cache
                .collect_pages(&key, TtlClass::Feed, PageOptions::default(), None, |request| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(match request.page_token {
                        None => Page::new(vec![item(1)], Some("p2".into())),
                        Some(_) => Page::new(Vec::new(), Some("p3".into())),
                    })
                })
                .await
                .unwrap();
            assert_eq!(items, vec![item(1)]);
            assert_eq!(calls.load(Ordering::SeqCst), expected_calls);
        }
        assert_eq!(cache.store().get(key.as_str()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_zero_max_pages_fetches_nothing() {
        let cache = resolver();
        let key = CacheKey::new(Namespace::Hub, "/v1/linksByFid?fid=6");
        let calls = AtomicUsize::new(0);
        let options = PageOptions {
            page_size: 100,
            max_pages: 0,
        };

        let items = collect(&cache, &key, options, None, &calls).await;
        assert!(items.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(cache.store().get(key.as_str()).await.unwrap(), None);

        // A normal walk afterwards is not shadowed by a cached empty list
        let all = collect(&cache, &key, PageOptions::default(), None, &calls).await;
        assert_eq!(all.len(), 5);
    }

    #[tokio::test]
    async fn test_short_circuit_bypasses_cache() {
        let cache = resolver();
        let key = CacheKey::new(Namespace::Hub, "/v1/castsByFid?fid=3");
        let calls = AtomicUsize::new(0);
        let predicate = ShortCircuit::HashPrefix("0x03".into());

        let found = collect(&cache, &key, PageOptions::default(), Some(&predicate), &calls).await;
        assert_eq!(found, vec![item(3)]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.store().get(key.as_str()).await.unwrap(), None);

        // A plain call afterwards still goes upstream
        let all = collect(&cache, &key, PageOptions::default(), None, &calls).await;
        assert_eq!(all.len(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        // And a short-circuited call ignores the now-populated cache
        let found = collect(&cache, &key, PageOptions::default(), Some(&predicate), &calls).await;
        assert_eq!(found, vec![item(3)]);
        assert_eq!(calls.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_short_circuit_without_match() {
        let cache = resolver();
        let key = CacheKey::new(Namespace::Hub, "/v1/castsByFid?fid=4");
        let calls = AtomicUsize::new(0);
        let predicate = ShortCircuit::FieldEquals {
            field: "n".into(),
            value: serde_json::json!(99),
        };

        let found = collect(&cache, &key, PageOptions::default(), Some(&predicate), &calls).await;
        assert!(found.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.store().get(key.as_str()).await.unwrap(), None);
    }

    #[test]
    fn test_field_equals() {
        let predicate = ShortCircuit::FieldEquals {
            field: "n".into(),
            value: serde_json::json!(2),
        };
        assert!(predicate.matches(&item(2)));
        assert!(!predicate.matches(&item(3)));

        let empty = ShortCircuit::HashPrefix(String::new());
        assert!(!empty.matches(&item(1)));
    }
}
