//! Cast rows: chunked idempotent upsert and reverse-chronological paging

use super::cursor::{decode_cursor, encode_cursor};
use super::{placeholders, Store};
use crate::{metrics, Result};
use hub_types::Cast;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde::Serialize;

/// Persisted cast identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CastRow {
    pub hash: String,
    pub fid: u64,
    /// Unix seconds
    pub timestamp: i64,
    pub deleted_at: Option<i64>,
}

impl CastRow {
    pub fn new(hash: impl Into<String>, fid: u64, timestamp: i64) -> Self {
        Self {
            hash: hash.into(),
            fid,
            timestamp,
            deleted_at: None,
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            hash: row.get(0)?,
            fid: row.get::<_, i64>(1)? as u64,
            timestamp: row.get(2)?,
            deleted_at: row.get(3)?,
        })
    }
}

impl From<&Cast> for CastRow {
    fn from(cast: &Cast) -> Self {
        Self::new(cast.hash.clone(), cast.fid, cast.timestamp)
    }
}

/// One page of a reverse-chronological feed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPage {
    pub items: Vec<CastRow>,
    /// Present only when more rows exist past this page
    pub next_cursor: Option<String>,
}

/// Aggregate cast counts
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CastStats {
    pub count: u64,
    pub num_fids: u64,
    pub earliest: Option<i64>,
    pub latest: Option<i64>,
    pub top_fids: Vec<FidStats>,
}

/// Cast counts for one fid
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FidStats {
    pub fid: u64,
    pub count: u64,
    pub earliest: i64,
    pub latest: i64,
}

impl Store {
    /// Insert unseen casts, returning how many rows were actually added
    ///
    /// Known hashes are left untouched.
    pub async fn upsert_casts(&self, casts: &[CastRow]) -> Result<usize> {
        if casts.is_empty() {
            return Ok(0);
        }

        let conn = self.connection().await?;
        let mut inserted = 0;

        for chunk in casts.chunks(self.chunk_size()) {
            let values = vec!["(?, ?, ?, ?)"; chunk.len()].join(", ");
            let sql = format!(
                "INSERT INTO casts (hash, fid, timestamp, deleted_at) VALUES {} ON CONFLICT(hash) DO NOTHING",
                values
            );
            let params = chunk.iter().flat_map(|c| {
                [
                    Value::Text(c.hash.clone()),
                    Value::Integer(c.fid as i64),
                    Value::Integer(c.timestamp),
                    c.deleted_at.map(Value::Integer).unwrap_or(Value::Null),
                ]
            });
            inserted += conn.execute(&sql, params_from_iter(params))?;
        }

        metrics::record_rows("casts", inserted, casts.len() - inserted);
        tracing::debug!(inserted, observed = casts.len(), "Upserted casts");
        Ok(inserted)
    }

    /// Newest live casts by any of `fids`, strictly older than the cursor boundary
    ///
    /// An undecodable cursor is ignored and the page starts from the newest cast.
    pub async fn get_reverse_chron_feed(
        &self,
        fids: &[u64],
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<FeedPage> {
        if fids.is_empty() || limit == 0 {
            return Ok(FeedPage {
                items: Vec::new(),
                next_cursor: None,
            });
        }

        let boundary = cursor.and_then(decode_cursor);
        let mut sql = format!(
            "SELECT hash, fid, timestamp, deleted_at FROM casts WHERE fid IN ({}) AND deleted_at IS NULL",
            placeholders(fids.len())
        );
        let mut params: Vec<Value> = fids.iter().map(|f| Value::Integer(*f as i64)).collect();
        if let Some(boundary) = boundary {
            sql.push_str(" AND timestamp < ?");
            params.push(Value::Integer(boundary));
        }
        sql.push_str(" ORDER BY timestamp DESC, hash DESC LIMIT ?");
        params.push(Value::Integer(limit as i64 + 1));

        let conn = self.connection().await?;
        let mut stmt = conn.prepare(&sql)?;
        let mut items = stmt
            .query_map(params_from_iter(params), CastRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let has_more = items.len() > limit;
        items.truncate(limit);
        let next_cursor = if has_more {
            items.last().map(|row| encode_cursor(row.timestamp))
        } else {
            None
        };

        Ok(FeedPage { items, next_cursor })
    }

    /// Live cast with exactly this hash
    pub async fn get_cast_by_hash(&self, hash: &str) -> Result<Option<CastRow>> {
        let conn = self.connection().await?;
        let row = conn
            .query_row(
                "SELECT hash, fid, timestamp, deleted_at FROM casts WHERE hash = ? AND deleted_at IS NULL LIMIT 1",
                params![hash.to_ascii_lowercase()],
                CastRow::from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Live cast whose hash starts with `short_hash`
    pub async fn get_cast_by_short_hash(&self, short_hash: &str) -> Result<Option<CastRow>> {
        let prefix = short_hash.to_ascii_lowercase();
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Ok(None);
        }

        let conn = self.connection().await?;
        let row = conn
            .query_row(
                "SELECT hash, fid, timestamp, deleted_at FROM casts WHERE hash LIKE ? AND deleted_at IS NULL LIMIT 1",
                params![format!("{}%", prefix)],
                CastRow::from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Totals plus the `top_n` fids with the most stored casts
    pub async fn stats(&self, top_n: usize) -> Result<CastStats> {
        let conn = self.connection().await?;

        let (count, num_fids, earliest, latest) = conn.query_row(
            "SELECT COUNT(*), COUNT(DISTINCT fid), MIN(timestamp), MAX(timestamp) FROM casts",
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)? as u64,
                    row.get::<_, i64>(1)? as u64,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                ))
            },
        )?;

        let mut stmt = conn.prepare(
            r#"
            SELECT fid, COUNT(*) AS count, MIN(timestamp), MAX(timestamp)
            FROM casts
            GROUP BY fid
            ORDER BY count DESC, fid ASC
            LIMIT ?
            "#,
        )?;
        let top_fids = stmt
            .query_map(params![top_n as i64], |row| {
                Ok(FidStats {
                    fid: row.get::<_, i64>(0)? as u64,
                    count: row.get::<_, i64>(1)? as u64,
                    earliest: row.get(2)?,
                    latest: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(CastStats {
            count,
            num_fids,
            earliest,
            latest,
            top_fids,
        })
    }

    /// Tombstone a cast; returns whether a live row was marked
    pub async fn mark_cast_deleted(&self, hash: &str, deleted_at: i64) -> Result<bool> {
        let conn = self.connection().await?;
        let changed = conn.execute(
            "UPDATE casts SET deleted_at = ? WHERE hash = ? AND deleted_at IS NULL",
            params![deleted_at, hash.to_ascii_lowercase()],
        )?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{memory_store, StoreConfig};

    fn hash(n: u32) -> String {
        format!("0x{:040x}", n)
    }

    fn rows(fid: u64, timestamps: &[i64]) -> Vec<CastRow> {
        timestamps
            .iter()
            .map(|t| CastRow::new(hash(fid as u32 * 1000 + *t as u32), fid, *t))
            .collect()
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = memory_store();
        let cast = rows(1, &[10]);

        assert_eq!(store.upsert_casts(&cast).await.unwrap(), 1);
        assert_eq!(store.upsert_casts(&cast).await.unwrap(), 0);
        assert_eq!(store.stats(5).await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_upsert_does_not_overwrite() {
        let store = memory_store();
        let original = CastRow::new(hash(7), 1, 100);
        store.upsert_casts(&[original.clone()]).await.unwrap();

        let changed = CastRow::new(hash(7), 2, 500);
        assert_eq!(store.upsert_casts(&[changed]).await.unwrap(), 0);
        assert_eq!(
            store.get_cast_by_hash(&hash(7)).await.unwrap(),
            Some(original)
        );
    }

    #[tokio::test]
    async fn test_upsert_counts_across_chunks() {
        let store = Store::new(StoreConfig::new(":memory:").with_chunk_size(3));
        let mut casts = rows(1, &[1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(store.upsert_casts(&casts[..4]).await.unwrap(), 4);

        // Mixed batch: 4 known, 3 new, spread over three chunks
        casts.reverse();
        assert_eq!(store.upsert_casts(&casts).await.unwrap(), 3);
        assert_eq!(store.stats(5).await.unwrap().count, 7);
    }

    #[tokio::test]
    async fn test_feed_pages_through_cursor() {
        let store = memory_store();
        store.upsert_casts(&rows(5, &[100, 90, 80, 70])).await.unwrap();
        store.upsert_casts(&rows(6, &[95])).await.unwrap();

        let first = store.get_reverse_chron_feed(&[5], 2, None).await.unwrap();
        let timestamps: Vec<i64> = first.items.iter().map(|r| r.timestamp).collect();
        assert_eq!(timestamps, vec![100, 90]);
        let cursor = first.next_cursor.expect("more rows exist");
        assert_eq!(decode_cursor(&cursor), Some(90));

        let second = store
            .get_reverse_chron_feed(&[5], 2, Some(&cursor))
            .await
            .unwrap();
        let timestamps: Vec<i64> = second.items.iter().map(|r| r.timestamp).collect();
        assert_eq!(timestamps, vec![80, 70]);
        assert_eq!(second.next_cursor, None);
    }

    #[tokio::test]
    async fn test_feed_exhaustion_boundary() {
        let store = memory_store();
        store.upsert_casts(&rows(5, &[30, 20, 10])).await.unwrap();

        let exact = store.get_reverse_chron_feed(&[5], 3, None).await.unwrap();
        assert_eq!(exact.items.len(), 3);
        assert_eq!(exact.next_cursor, None);

        let short = store.get_reverse_chron_feed(&[5], 2, None).await.unwrap();
        assert_eq!(short.items.len(), 2);
        let boundary = decode_cursor(short.next_cursor.as_deref().unwrap()).unwrap();
        assert!(boundary <= short.items[1].timestamp);
    }

    #[tokio::test]
    async fn test_feed_ignores_bad_cursor_and_deleted_rows() {
        let store = memory_store();
        let casts = rows(5, &[100, 90]);
        store.upsert_casts(&casts).await.unwrap();
        assert!(store.mark_cast_deleted(&casts[0].hash, 200).await.unwrap());

        let page = store
            .get_reverse_chron_feed(&[5], 10, Some("v9:garbage"))
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].timestamp, 90);
    }

    #[tokio::test]
    async fn test_feed_empty_inputs() {
        let store = memory_store();
        store.upsert_casts(&rows(5, &[100])).await.unwrap();

        let page = store.get_reverse_chron_feed(&[], 10, None).await.unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.next_cursor, None);

        let page = store.get_reverse_chron_feed(&[5], 0, None).await.unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.next_cursor, None);
    }

    #[tokio::test]
    async fn test_short_hash_lookup() {
        let store = memory_store();
        let cast = CastRow::new("0xabcdef0123456789abcdef0123456789abcdef01", 3, 50);
        store.upsert_casts(&[cast.clone()]).await.unwrap();

        assert_eq!(
            store.get_cast_by_short_hash("0xABCDEF01").await.unwrap(),
            Some(cast)
        );
        assert_eq!(store.get_cast_by_short_hash("0xbeef").await.unwrap(), None);
        assert_eq!(store.get_cast_by_short_hash("0x%").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stats_top_fids() {
        let store = memory_store();
        store.upsert_casts(&rows(1, &[1, 2, 3])).await.unwrap();
        store.upsert_casts(&rows(2, &[5])).await.unwrap();

        let stats = store.stats(1).await.unwrap();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.num_fids, 2);
        assert_eq!(stats.earliest, Some(1));
        assert_eq!(stats.latest, Some(5));
        assert_eq!(
            stats.top_fids,
            vec![FidStats {
                fid: 1,
                count: 3,
                earliest: 1,
                latest: 3
            }]
        );
    }
}
