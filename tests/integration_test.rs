//! Integration tests for castgate
//!
//! These tests exercise the store, cache and mutuals engine together through
//! the public API, without any network access.

use async_trait::async_trait;
use castgate::cache::{
    CacheAside, CacheKey, CacheStore, Namespace, Page, PageOptions, ShortCircuit,
    SqliteCacheConfig, SqliteCacheStore, TtlClass,
};
use castgate::config::GatewayConfig;
use castgate::mutuals::{FollowGraph, MutualsEngine};
use castgate::retry::RetryPolicy;
use castgate::storage::{decode_cursor, encode_cursor, CastRow, Store, StoreConfig};
use castgate::{GatewayError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn hash(n: u32) -> String {
    format!("0x{:040x}", n)
}

fn memory_store() -> Store {
    Store::new(StoreConfig::new(":memory:"))
}

mod cursor_tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for t in [0, 1, 99, 1_609_459_200, 1_750_000_000, i64::MAX - 42069, i64::MAX] {
            assert_eq!(decode_cursor(&encode_cursor(t)), Some(t), "timestamp {t}");
        }
    }

    #[test]
    fn test_malformed_tokens_decode_to_none() {
        for token in ["", "v1:", "v2:MTQyMTY5", "v1:!!!", "MTQyMTY5", "v1:bm90LWEtbnVtYmVy"] {
            assert_eq!(decode_cursor(token), None, "token {token:?}");
        }
    }
}

mod store_tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = memory_store();
        let cast = vec![CastRow::new(hash(1), 5, 100)];

        assert_eq!(store.upsert_casts(&cast).await.unwrap(), 1);
        assert_eq!(store.upsert_casts(&cast).await.unwrap(), 0);
        assert_eq!(store.stats(1).await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_upsert_counts_across_chunks() {
        let store = Store::new(StoreConfig::new(":memory:").with_chunk_size(3));
        let rows: Vec<_> = (0..10).map(|n| CastRow::new(hash(n), 1, n as i64)).collect();

        assert_eq!(store.upsert_casts(&rows[..4]).await.unwrap(), 4);
        assert_eq!(store.upsert_casts(&rows).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_feed_exhaustion() {
        let store = memory_store();
        let rows: Vec<_> = (1..=3).map(|n| CastRow::new(hash(n), 8, n as i64 * 10)).collect();
        store.upsert_casts(&rows).await.unwrap();

        let exact = store.get_reverse_chron_feed(&[8], 3, None).await.unwrap();
        assert_eq!(exact.items.len(), 3);
        assert!(exact.next_cursor.is_none());

        let short = store.get_reverse_chron_feed(&[8], 2, None).await.unwrap();
        assert_eq!(short.items.len(), 2);
        let boundary = decode_cursor(short.next_cursor.as_deref().unwrap()).unwrap();
        let oldest = short.items.last().unwrap().timestamp;
        assert!(boundary <= oldest);

        let rest = store
            .get_reverse_chron_feed(&[8], 2, short.next_cursor.as_deref())
            .await
            .unwrap();
        assert!(rest.items.iter().all(|row| row.timestamp < oldest));
    }

    #[tokio::test]
    async fn test_feed_scenario() {
        let store = memory_store();
        let rows: Vec<_> = [100, 90, 80, 70]
            .iter()
            .enumerate()
            .map(|(i, t)| CastRow::new(hash(i as u32), 5, *t))
            .collect();
        store.upsert_casts(&rows).await.unwrap();

        let first = store.get_reverse_chron_feed(&[5], 2, None).await.unwrap();
        assert_eq!(
            first.items.iter().map(|r| r.timestamp).collect::<Vec<_>>(),
            vec![100, 90]
        );
        let cursor = first.next_cursor.expect("cursor");

        let second = store
            .get_reverse_chron_feed(&[5], 2, Some(&cursor))
            .await
            .unwrap();
        assert_eq!(
            second.items.iter().map(|r| r.timestamp).collect::<Vec<_>>(),
            vec![80, 70]
        );
        assert!(second.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_bad_cursor_starts_from_latest() {
        let store = memory_store();
        store
            .upsert_casts(&[CastRow::new(hash(1), 5, 100), CastRow::new(hash(2), 5, 50)])
            .await
            .unwrap();

        let page = store
            .get_reverse_chron_feed(&[5], 10, Some("v9:garbage"))
            .await
            .unwrap();
        assert_eq!(page.items.len(), 2);
    }

    #[tokio::test]
    async fn test_store_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", temp_dir.path().join("casts.db").display());

        {
            let store = Store::new(StoreConfig::new(&url));
            store.upsert_casts(&[CastRow::new(hash(1), 5, 100)]).await.unwrap();
        }

        let store = Store::new(StoreConfig::new(&url));
        assert_eq!(store.upsert_casts(&[CastRow::new(hash(1), 5, 100)]).await.unwrap(), 0);
        assert!(store.get_cast_by_short_hash(&hash(1)[..10]).await.unwrap().is_some());
    }
}

mod cache_tests {
    use super::*;

    #[tokio::test]
    async fn test_entries_persist_on_disk() {
        let temp_dir = TempDir::new().unwrap();
        let config = SqliteCacheConfig {
            path: temp_dir.path().join("cache.db"),
            ..Default::default()
        };
        let key = CacheKey::new(Namespace::Hub, "/v1/userNameProofByName?name=alice");

        {
            let store = Arc::new(SqliteCacheStore::new(config.clone()).unwrap());
            let cache = CacheAside::new(store, RetryPolicy::none());
            let fid: u64 = cache
                .resolve(&key, TtlClass::Long, || async { Ok(3u64) })
                .await
                .unwrap();
            assert_eq!(fid, 3);
        }

        let store = Arc::new(SqliteCacheStore::new(config).unwrap());
        let cache = CacheAside::new(store, RetryPolicy::none());
        let fid: u64 = cache
            .resolve(&key, TtlClass::Long, || async {
                Err(GatewayError::Other("should be served from cache".into()))
            })
            .await
            .unwrap();
        assert_eq!(fid, 3);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refetched() {
        let store = Arc::new(SqliteCacheStore::in_memory().unwrap());
        store.set("hub:/x", "1", Duration::ZERO).await.unwrap();

        let cache = CacheAside::new(store.clone(), RetryPolicy::none());
        let key = CacheKey::new(Namespace::Hub, "/x");
        let value: u32 = cache
            .resolve(&key, TtlClass::Short, || async { Ok(2u32) })
            .await
            .unwrap();
        assert_eq!(value, 2);
        assert_eq!(store.get("hub:/x").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_short_circuit_leaves_no_cache_entry() {
        let cache = CacheAside::new(
            Arc::new(SqliteCacheStore::in_memory().unwrap()),
            RetryPolicy::none(),
        );
        let key = CacheKey::new(Namespace::Hub, "/v1/castsByFid?fid=9");
        let calls = &AtomicUsize::new(0);
        let items = || vec![serde_json::json!({ "hash": "0xaa01" }), serde_json::json!({ "hash": "0xbb02" })];

        let found: Vec<serde_json::Value> = cache
            .collect_pages(
                &key,
                TtlClass::Feed,
                PageOptions::default(),
                Some(&ShortCircuit::HashPrefix("0xbb".into())),
                |_| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Page::new(items(), None))
                },
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        let all: Vec<serde_json::Value> = cache
            .collect_pages(&key, TtlClass::Feed, PageOptions::default(), None, |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Page::new(items(), None))
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

mod mutuals_tests {
    use super::*;

    struct StaticGraph(HashMap<u64, Vec<u64>>);

    #[async_trait]
    impl FollowGraph for StaticGraph {
        async fn following(&self, fid: u64) -> Result<Vec<u64>> {
            Ok(self.0.get(&fid).cloned().unwrap_or_default())
        }
    }

    fn engine() -> MutualsEngine<StaticGraph> {
        let graph = StaticGraph(HashMap::from([
            (1, vec![2, 3, 4]),
            (2, vec![1, 3]),
            (3, vec![1]),
            (4, vec![]),
        ]));
        MutualsEngine::new(graph, Arc::new(memory_store()))
    }

    #[tokio::test]
    async fn test_symmetry_over_all_pairs() {
        let engine = engine();
        for a in 1..=5 {
            for b in 1..=5 {
                if a == b {
                    assert!(matches!(
                        engine.compute_mutual(a, b).await,
                        Err(GatewayError::Precondition(_))
                    ));
                    continue;
                }
                assert_eq!(
                    engine.compute_mutual(a, b).await.unwrap(),
                    engine.compute_mutual(b, a).await.unwrap()
                );
            }
        }
    }

    #[tokio::test]
    async fn test_stored_index_follows_live_checks() {
        let engine = engine();
        assert!(engine.get_mutuals(1).await.unwrap().is_empty());

        assert!(engine.compute_mutual(1, 2).await.unwrap());
        assert!(engine.compute_mutual(1, 3).await.unwrap());
        assert!(!engine.compute_mutual(1, 4).await.unwrap());

        assert_eq!(engine.get_mutuals(1).await.unwrap(), vec![2, 3]);
        assert_eq!(engine.get_mutuals_by_fids(1, 2).await.unwrap(), vec![3]);
    }
}

mod config_tests {
    use super::*;

    #[test]
    fn test_load_yaml_with_env_overrides() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
hub:
  base_url: http://localhost:2281
cache:
  backend: sqlite
  path: /tmp/castgate-cache.db
batch:
  refresh_batch_size: 5
channel_exceptions:
  "chain://eip155:1/erc721:0x9c8ff314c9bc7f6e59a9d9225fb22946427edc03": nouns
"#,
        )
        .unwrap();

        let mut config = GatewayConfig::load(&path).unwrap();
        assert_eq!(config.hub.base_url, "http://localhost:2281");
        assert_eq!(config.batch.refresh_batch_size, 5);
        assert_eq!(config.batch.upsert_chunk_size, 500);
        assert_eq!(config.channel_exceptions.len(), 1);
        assert!(config.require_database_url().is_err());

        config.apply_env(|key| match key {
            "DATABASE_URL" => Some("sqlite::memory:".to_string()),
            _ => None,
        });
        assert_eq!(config.require_database_url().unwrap(), "sqlite::memory:");
    }

    #[test]
    fn test_missing_config_file() {
        let result = GatewayConfig::load("/nonexistent/castgate.yaml");
        assert!(matches!(result, Err(GatewayError::Config(_))));
    }
}
