//! Mutual-follow computation and follow-graph maintenance
//!
//! The live pairwise check in [`MutualsEngine::compute_mutual`] is the
//! authoritative answer. Stored follow edges are a derived index that
//! [`MutualsEngine::get_mutuals`] reads without going upstream; it is only as
//! fresh as the last check or backfill that wrote to it.

use crate::progress;
use crate::storage::{FollowEdge, Store};
use crate::{GatewayError, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

/// Source of "who does this fid follow"
#[async_trait]
pub trait FollowGraph: Send + Sync {
    async fn following(&self, fid: u64) -> Result<Vec<u64>>;
}

/// Outcome counts for a batch job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Computes and persists symmetric follow relationships
pub struct MutualsEngine<G> {
    graph: G,
    store: Arc<Store>,
}

impl<G: FollowGraph> MutualsEngine<G> {
    pub fn new(graph: G, store: Arc<Store>) -> Self {
        Self { graph, store }
    }

    /// Whether `fid1` and `fid2` follow each other
    ///
    /// When they do, every edge from both follow lists is stored. A storage
    /// failure is logged and does not change the answer.
    pub async fn compute_mutual(&self, fid1: u64, fid2: u64) -> Result<bool> {
        if fid1 == fid2 {
            return Err(GatewayError::Precondition(format!(
                "mutual check needs two distinct fids, got {} twice",
                fid1
            )));
        }

        let (following1, following2) =
            futures::future::try_join(self.graph.following(fid1), self.graph.following(fid2))
                .await?;

        let is_mutual = following1.contains(&fid2) && following2.contains(&fid1);
        tracing::debug!(fid1, fid2, is_mutual, "Computed mutual");

        if is_mutual {
            let mut edges = FollowEdge::from_targets(fid1, &following1);
            edges.extend(FollowEdge::from_targets(fid2, &following2));
            if let Err(e) = self.store.insert_follows(&edges).await {
                tracing::warn!(fid1, fid2, error = %e, "Failed to persist follow edges");
            }
        }

        Ok(is_mutual)
    }

    /// Stored mutuals of `fid`, ascending; no upstream call
    pub async fn get_mutuals(&self, fid: u64) -> Result<Vec<u64>> {
        self.store.get_mutuals(fid).await
    }

    /// Fids both accounts follow, ascending
    pub async fn get_mutuals_by_fids(&self, fid1: u64, fid2: u64) -> Result<Vec<u64>> {
        let (following1, following2) =
            futures::future::try_join(self.graph.following(fid1), self.graph.following(fid2))
                .await?;

        let first: BTreeSet<u64> = following1.into_iter().collect();
        let shared: BTreeSet<u64> = following2
            .into_iter()
            .filter(|fid| first.contains(fid))
            .collect();
        Ok(shared.into_iter().collect())
    }

    /// Store the follow lists of `fids` that have no stored mutuals yet
    pub async fn backfill_follows(&self, fids: &[u64], quiet: bool) -> BatchReport {
        let started = Instant::now();
        let mut report = BatchReport::default();

        for (index, fid) in fids.iter().copied().enumerate() {
            match self.store.get_mutuals(fid).await {
                Ok(known) if !known.is_empty() => {
                    progress!(quiet, fid, known = known.len(), "Known mutuals, skipping");
                    report.skipped += 1;
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(fid, error = %e, "Could not read stored mutuals");
                    report.failed += 1;
                    continue;
                }
            }

            let result = async {
                let following = self.graph.following(fid).await?;
                self.store
                    .insert_follows(&FollowEdge::from_targets(fid, &following))
                    .await
            }
            .await;

            match result {
                Ok(inserted) => {
                    progress!(
                        quiet,
                        fid,
                        inserted,
                        done = index + 1,
                        total = fids.len(),
                        "Backfilled follows"
                    );
                    report.succeeded += 1;
                }
                Err(e) => {
                    tracing::error!(fid, error = %e, "Backfill failed");
                    report.failed += 1;
                }
            }
        }

        progress!(
            quiet,
            succeeded = report.succeeded,
            skipped = report.skipped,
            failed = report.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Follow backfill finished"
        );
        report
    }

    /// Queue a mutual check between `fid` and everyone it follows
    pub async fn queue_checks_for(&self, fid: u64) -> Result<usize> {
        let following = self.graph.following(fid).await?;
        let mut queued = 0;
        let mut self_follows = 0;

        for target in following {
            if target == fid {
                self_follows += 1;
                continue;
            }
            if self.store.enqueue_mutual_check(fid, target).await? {
                queued += 1;
            }
        }

        tracing::info!(fid, queued, self_follows, "Queued mutual checks");
        Ok(queued)
    }

    /// Run up to `limit` queued checks, recording each outcome
    pub async fn process_pending_checks(&self, limit: usize, quiet: bool) -> Result<BatchReport> {
        let pending = self.store.pending_mutual_checks(limit).await?;
        let started = Instant::now();
        let mut report = BatchReport::default();

        for (index, check) in pending.iter().enumerate() {
            let result = async {
                let is_mutual = self.compute_mutual(check.fid1, check.fid2).await?;
                self.store
                    .record_mutual_check(check.fid1, check.fid2, is_mutual)
                    .await?;
                Ok::<_, GatewayError>(is_mutual)
            }
            .await;

            match result {
                Ok(is_mutual) => {
                    progress!(
                        quiet,
                        fid1 = check.fid1,
                        fid2 = check.fid2,
                        is_mutual,
                        done = index + 1,
                        total = pending.len(),
                        "Checked mutual"
                    );
                    report.succeeded += 1;
                }
                Err(e) => {
                    tracing::error!(fid1 = check.fid1, fid2 = check.fid2, error = %e, "Mutual check failed");
                    report.failed += 1;
                }
            }
        }

        if report.failed == 0 {
            progress!(
                quiet,
                succeeded = report.succeeded,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Processed mutual checks"
            );
        } else {
            tracing::warn!(
                succeeded = report.succeeded,
                failed = report.failed,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Processed mutual checks with errors"
            );
        }
        Ok(report)
    }
}
