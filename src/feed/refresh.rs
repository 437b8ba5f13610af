//! Batch refresh of the stored cast index

use crate::config::BatchConfig;
use crate::progress;
use crate::storage::{CastRow, Store};
use crate::upstream::HubApi;
use crate::{GatewayError, Result};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshStats {
    pub total_fids: usize,
    pub total_casts: usize,
    pub total_new_casts: usize,
    pub failed_fids: Vec<u64>,
}

/// Pulls each fid's newest casts from the hub into the store
pub struct Refresher {
    hub: HubApi,
    store: Arc<Store>,
    batch: BatchConfig,
}

impl Refresher {
    pub fn new(hub: HubApi, store: Arc<Store>, batch: BatchConfig) -> Self {
        Self { hub, store, batch }
    }

    /// Refresh `fids` plus, when given, a user and up to `max_followers` of
    /// the accounts they follow
    pub async fn refresh(
        &self,
        username: Option<&str>,
        fids: &[u64],
        quiet: bool,
    ) -> Result<RefreshStats> {
        let mut targets = fids.to_vec();

        if let Some(username) = username {
            let fid = self
                .hub
                .fid_by_username(username)
                .await?
                .ok_or_else(|| GatewayError::NotFound(format!("username {}", username)))?;
            let following = self.hub.following_by_fid(fid).await?;
            targets.push(fid);
            targets.extend(following.into_iter().take(self.batch.max_followers));
        }

        let mut seen = HashSet::new();
        targets.retain(|fid| seen.insert(*fid));

        if targets.is_empty() {
            return Err(GatewayError::Precondition(
                "refresh needs a username or at least one fid".to_string(),
            ));
        }

        Ok(self.process_fids(&targets, quiet).await)
    }

    /// Fetch and store casts for `fids`, one concurrent group at a time
    ///
    /// Fetches within a group run concurrently; upserts run one after another.
    /// A fid that fails is reported and does not stop the rest.
    pub async fn process_fids(&self, fids: &[u64], quiet: bool) -> RefreshStats {
        let started = Instant::now();
        let mut stats = RefreshStats {
            total_fids: fids.len(),
            ..Default::default()
        };
        let group_size = self.batch.refresh_batch_size.max(1);
        let casts_size = self.batch.refresh_casts_size as usize;

        for (group_index, group) in fids.chunks(group_size).enumerate() {
            let fetched = join_all(group.iter().map(|fid| self.hub.casts_by_fid(*fid, casts_size))).await;

            for (fid, result) in group.iter().copied().zip(fetched) {
                let casts = match result {
                    Ok(casts) => casts,
                    Err(e) => {
                        tracing::error!(fid, error = %e, "Fetching casts failed");
                        stats.failed_fids.push(fid);
                        continue;
                    }
                };

                let rows: Vec<CastRow> = casts.iter().map(CastRow::from).collect();
                match self.store.upsert_casts(&rows).await {
                    Ok(inserted) => {
                        stats.total_casts += rows.len();
                        stats.total_new_casts += inserted;
                        progress!(quiet, fid, casts = rows.len(), new = inserted, "Refreshed fid");
                    }
                    Err(e) => {
                        tracing::error!(fid, error = %e, "Storing casts failed");
                        stats.failed_fids.push(fid);
                    }
                }
            }

            progress!(
                quiet,
                group = group_index + 1,
                done = ((group_index + 1) * group_size).min(fids.len()),
                total = fids.len(),
                "Refresh group finished"
            );
        }

        progress!(
            quiet,
            total_fids = stats.total_fids,
            total_casts = stats.total_casts,
            total_new_casts = stats.total_new_casts,
            failed = stats.failed_fids.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Refresh finished"
        );
        stats
    }
}
