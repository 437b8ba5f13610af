//! SQLite cache store
//!
//! Local stand-in for the remote cache service, used for development and
//! tests. Entries live in a single key/value table with an absolute expiry.

use super::store::CacheStore;
use crate::Result;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;

/// Cache configuration
#[derive(Debug, Clone)]
pub struct SqliteCacheConfig {
    /// Path to SQLite database file
    pub path: PathBuf,

    /// Enable WAL mode for better concurrency
    pub wal_mode: bool,
}

impl Default for SqliteCacheConfig {
    fn default() -> Self {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".config");
        path.push("castgate");
        path.push("cache.db");

        Self {
            path,
            wal_mode: true,
        }
    }
}

/// SQLite-backed [`CacheStore`]
pub struct SqliteCacheStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteCacheStore {
    /// Open or create a cache database
    pub fn new(config: SqliteCacheConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %config.path.display(), "Opening cache database");

        let conn = Connection::open(&config.path)?;
        if config.wal_mode {
            conn.pragma_update(None, "journal_mode", "WAL")?;
        }
        init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(config.path),
        })
    }

    /// Throwaway in-memory store
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Delete every expired entry, returning how many were removed
    pub async fn purge_expired(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        let removed = conn.execute(
            "DELETE FROM cache_entries WHERE expires_at <= ?",
            params![now_millis()],
        )?;
        tracing::debug!(removed, "Purged expired cache entries");
        Ok(removed)
    }

    /// Clear all cached data
    pub async fn clear(&self) -> Result<()> {
        tracing::info!("Clearing cache");
        self.conn.lock().await.execute("DELETE FROM cache_entries", [])?;
        Ok(())
    }

    /// Get cache statistics
    pub async fn stats(&self) -> Result<CacheStats> {
        let conn = self.conn.lock().await;
        let now = now_millis();

        let entry_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
        let expired_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM cache_entries WHERE expires_at <= ?",
            params![now],
            |row| row.get(0),
        )?;
        let last_write: Option<i64> = conn
            .query_row("SELECT MAX(updated_at) FROM cache_entries", [], |row| {
                row.get::<_, Option<i64>>(0)
            })
            .optional()?
            .flatten();

        let mut stmt = conn.prepare(
            r#"
            SELECT substr(key, 1, instr(key, ':') - 1) AS namespace, COUNT(*)
            FROM cache_entries
            WHERE expires_at > ? AND instr(key, ':') > 0
            GROUP BY namespace
            ORDER BY namespace
            "#,
        )?;
        let namespaces = stmt
            .query_map(params![now], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(CacheStats {
            entry_count: entry_count as usize,
            expired_count: expired_count as usize,
            last_write,
            namespaces,
        })
    }

    /// Get the database path (`None` for in-memory stores)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT value, expires_at FROM cache_entries WHERE key = ?",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((_, expires_at)) if expires_at <= now_millis() => {
                conn.execute("DELETE FROM cache_entries WHERE key = ?", params![key])?;
                tracing::trace!(key, "Cache entry expired");
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let now = now_millis();
        let expires_at = now.saturating_add(ttl.as_millis() as i64);
        self.conn.lock().await.execute(
            "INSERT OR REPLACE INTO cache_entries (key, value, expires_at, updated_at) VALUES (?, ?, ?, ?)",
            params![key, value, expires_at, now],
        )?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.conn
            .lock()
            .await
            .execute("DELETE FROM cache_entries WHERE key = ?", params![key])?;
        Ok(())
    }
}

/// Cache statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub expired_count: usize,
    /// Unix millis of the most recent write
    pub last_write: Option<i64>,
    /// Live entries per key namespace
    pub namespaces: Vec<(String, usize)>,
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS cache_entries (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            expires_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_cache_entries_expires ON cache_entries(expires_at);
        "#,
    )?;
    Ok(())
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
