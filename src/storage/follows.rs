//! Follow edges and the mutual-check queue

use super::Store;
use crate::{metrics, GatewayError, Result};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter};
use serde::Serialize;

/// "`fid` follows `target`", never a self-edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FollowEdge {
    fid: u64,
    target: u64,
}

impl FollowEdge {
    pub fn new(fid: u64, target: u64) -> Result<Self> {
        if fid == target {
            return Err(GatewayError::Precondition(format!(
                "fid {} cannot follow itself",
                fid
            )));
        }
        Ok(Self { fid, target })
    }

    /// Edges from `fid` to each of `targets`, dropping self-edges
    pub fn from_targets(fid: u64, targets: &[u64]) -> Vec<Self> {
        targets
            .iter()
            .filter_map(|target| Self::new(fid, *target).ok())
            .collect()
    }

    pub fn fid(&self) -> u64 {
        self.fid
    }

    pub fn target(&self) -> u64 {
        self.target
    }
}

/// A queued or completed mutual check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutualCheck {
    pub fid1: u64,
    pub fid2: u64,
    pub is_mutual: Option<bool>,
    /// Unix seconds; `None` while pending
    pub checked_at: Option<i64>,
}

/// Pair key with the smaller fid first
fn ordered_pair(a: u64, b: u64) -> Result<(u64, u64)> {
    if a == b {
        return Err(GatewayError::Precondition(format!(
            "mutual check needs two distinct fids, got {} twice",
            a
        )));
    }
    Ok((a.min(b), a.max(b)))
}

impl Store {
    /// Persist follow edges, returning how many were new
    pub async fn insert_follows(&self, edges: &[FollowEdge]) -> Result<usize> {
        if edges.is_empty() {
            return Ok(0);
        }

        let conn = self.connection().await?;
        let mut inserted = 0;

        for chunk in edges.chunks(self.chunk_size()) {
            let sql = format!(
                "INSERT INTO follows (fid, target) VALUES {} ON CONFLICT(fid, target) DO NOTHING",
                vec!["(?, ?)"; chunk.len()].join(", ")
            );
            let params = chunk.iter().flat_map(|e| {
                [
                    Value::Integer(e.fid as i64),
                    Value::Integer(e.target as i64),
                ]
            });
            inserted += conn.execute(&sql, params_from_iter(params))?;
        }

        metrics::record_rows("follows", inserted, edges.len() - inserted);
        tracing::debug!(inserted, observed = edges.len(), "Inserted follow edges");
        Ok(inserted)
    }

    /// Stored targets with a reciprocal stored edge, ascending
    pub async fn get_mutuals(&self, fid: u64) -> Result<Vec<u64>> {
        let conn = self.connection().await?;
        let mut stmt = conn.prepare(
            r#"
            SELECT f.target
            FROM follows f
            JOIN follows r ON r.fid = f.target AND r.target = f.fid
            WHERE f.fid = ?
            ORDER BY f.target ASC
            "#,
        )?;
        let mutuals = stmt
            .query_map(params![fid as i64], |row| row.get::<_, i64>(0))?
            .map(|r| r.map(|fid| fid as u64))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(mutuals)
    }

    /// Every stored target of `fid`, ascending
    pub async fn follow_targets(&self, fid: u64) -> Result<Vec<u64>> {
        let conn = self.connection().await?;
        let mut stmt = conn.prepare("SELECT target FROM follows WHERE fid = ? ORDER BY target ASC")?;
        let targets = stmt
            .query_map(params![fid as i64], |row| row.get::<_, i64>(0))?
            .map(|r| r.map(|fid| fid as u64))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(targets)
    }

    /// Queue a pair for checking; returns false if it was already queued
    pub async fn enqueue_mutual_check(&self, a: u64, b: u64) -> Result<bool> {
        let (fid1, fid2) = ordered_pair(a, b)?;
        let conn = self.connection().await?;
        let inserted = conn.execute(
            "INSERT INTO mutual_checks (fid1, fid2) VALUES (?, ?) ON CONFLICT(fid1, fid2) DO NOTHING",
            params![fid1 as i64, fid2 as i64],
        )?;
        Ok(inserted > 0)
    }

    /// Up to `limit` pairs not yet checked
    pub async fn pending_mutual_checks(&self, limit: usize) -> Result<Vec<MutualCheck>> {
        let conn = self.connection().await?;
        let mut stmt = conn.prepare(
            r#"
            SELECT fid1, fid2, is_mutual, checked_at
            FROM mutual_checks
            WHERE checked_at IS NULL
            ORDER BY fid1 ASC, fid2 ASC
            LIMIT ?
            "#,
        )?;
        let checks = stmt
            .query_map(params![limit as i64], |row| {
                Ok(MutualCheck {
                    fid1: row.get::<_, i64>(0)? as u64,
                    fid2: row.get::<_, i64>(1)? as u64,
                    is_mutual: row.get(2)?,
                    checked_at: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(checks)
    }

    /// Record the outcome of a check, queueing the pair if it was not queued
    pub async fn record_mutual_check(&self, a: u64, b: u64, is_mutual: bool) -> Result<()> {
        let (fid1, fid2) = ordered_pair(a, b)?;
        let conn = self.connection().await?;
        conn.execute(
            r#"
            INSERT INTO mutual_checks (fid1, fid2, is_mutual, checked_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(fid1, fid2) DO UPDATE SET
                is_mutual = excluded.is_mutual,
                checked_at = excluded.checked_at
            "#,
            params![
                fid1 as i64,
                fid2 as i64,
                is_mutual,
                chrono::Utc::now().timestamp()
            ],
        )?;
        Ok(())
    }
}
