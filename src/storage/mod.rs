//! Relational store for casts, follow edges and queued mutual checks
//!
//! Backed by SQLite. The connection is opened lazily on first use and shared
//! behind an async mutex; each operation takes the lock for one statement
//! sequence and never holds transaction state across an await.

mod casts;
mod cursor;
mod follows;

pub use casts::{CastRow, CastStats, FeedPage, FidStats};
pub use cursor::{decode_cursor, encode_cursor};
pub use follows::{FollowEdge, MutualCheck};

use crate::config::GatewayConfig;
use crate::Result;
use rusqlite::Connection;
use std::path::PathBuf;
use tokio::sync::{Mutex, MutexGuard, OnceCell};

pub const DEFAULT_UPSERT_CHUNK_SIZE: usize = 500;

/// Store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// SQLite path, `sqlite://` URL or `:memory:`
    pub url: String,

    /// Rows per INSERT statement
    pub chunk_size: usize,
}

impl StoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            chunk_size: DEFAULT_UPSERT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

/// Durable store of casts and follow edges
pub struct Store {
    config: StoreConfig,
    conn: OnceCell<Mutex<Connection>>,
}

impl Store {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            conn: OnceCell::new(),
        }
    }

    /// Build from configuration, failing when no database URL is set
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let url = config.require_database_url()?;
        Ok(Self::new(
            StoreConfig::new(url).with_chunk_size(config.batch.upsert_chunk_size),
        ))
    }

    pub fn chunk_size(&self) -> usize {
        self.config.chunk_size
    }

    pub(crate) async fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        let conn = self
            .conn
            .get_or_try_init(|| async { open_connection(&self.config.url).map(Mutex::new) })
            .await?;
        Ok(conn.lock().await)
    }
}

fn database_path(url: &str) -> Option<PathBuf> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    if path.is_empty() || path == ":memory:" {
        None
    } else {
        Some(PathBuf::from(path))
    }
}

fn open_connection(url: &str) -> Result<Connection> {
    let conn = match database_path(url) {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            tracing::info!(path = %path.display(), "Opening store database");
            let conn = Connection::open(&path)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn
        }
        None => {
            tracing::info!("Opening in-memory store database");
            Connection::open_in_memory()?
        }
    };
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS casts (
            hash TEXT PRIMARY KEY,
            fid INTEGER NOT NULL,
            timestamp INTEGER NOT NULL,
            deleted_at INTEGER
        );

        CREATE TABLE IF NOT EXISTS follows (
            fid INTEGER NOT NULL,
            target INTEGER NOT NULL,
            PRIMARY KEY (fid, target),
            CHECK (fid <> target)
        );

        CREATE TABLE IF NOT EXISTS mutual_checks (
            fid1 INTEGER NOT NULL,
            fid2 INTEGER NOT NULL,
            is_mutual INTEGER,
            checked_at INTEGER,
            PRIMARY KEY (fid1, fid2)
        );

        CREATE INDEX IF NOT EXISTS idx_casts_fid_timestamp ON casts(fid, timestamp DESC);
        CREATE INDEX IF NOT EXISTS idx_casts_timestamp ON casts(timestamp DESC);
        CREATE INDEX IF NOT EXISTS idx_follows_target ON follows(target);
        CREATE INDEX IF NOT EXISTS idx_mutual_checks_pending ON mutual_checks(checked_at);
        "#,
    )?;
    Ok(())
}

/// `?, ?, ...` with `n` placeholders
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[cfg(test)]
pub(crate) fn memory_store() -> Store {
    Store::new(StoreConfig::new(":memory:"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_database_path() {
        assert_eq!(database_path(":memory:"), None);
        assert_eq!(database_path("sqlite://:memory:"), None);
        assert_eq!(
            database_path("sqlite:///var/lib/castgate.db"),
            Some(PathBuf::from("/var/lib/castgate.db"))
        );
        assert_eq!(database_path("data/casts.db"), Some(PathBuf::from("data/casts.db")));
    }

    #[tokio::test]
    async fn test_lazy_open_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("store.db");
        let store = Store::new(StoreConfig::new(path.to_string_lossy()));

        assert!(!path.exists());
        store.connection().await.unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_from_config_requires_url() {
        let config = GatewayConfig::default();
        assert!(Store::from_config(&config).is_err());
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?, ?, ?");
    }
}
