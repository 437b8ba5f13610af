//! castgate - Read-through caching gateway for Farcaster data
//!
//! Main entry point for the castgate CLI. Every command prints a JSON object
//! with a `success` field to stdout.

use anyhow::Context;
use castgate::cache::{self, CacheAside, SqliteCacheConfig, SqliteCacheStore};
use castgate::config::{CacheBackendKind, GatewayConfig};
use castgate::feed::{FeedService, Refresher, FEED_DEFAULT_PAGE_SIZE};
use castgate::hydration::Hydrator;
use castgate::logging::{self, Verbosity};
use castgate::metrics;
use castgate::mutuals::MutualsEngine;
use castgate::storage::Store;
use castgate::upstream::{HubApi, WarpcastApi};
use castgate::GatewayError;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// castgate - Cached Farcaster identity, graph and feed queries
#[derive(Parser, Debug)]
#[command(name = "castgate")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: ~/.config/castgate/config.yaml)
    #[arg(short, long, env = "CASTGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Errors only, and per-item progress demoted to debug
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Write Prometheus metrics for this run to a file when the command finishes
    #[arg(long, global = true, env = "CASTGATE_METRICS_FILE", value_name = "PATH")]
    metrics_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reverse-chronological feed for a set of fids, or a channel feed
    Feed {
        /// Comma-separated fids
        #[arg(long, value_delimiter = ',')]
        fids: Vec<u64>,

        /// Channel id; when set, --fids and --cursor are ignored
        #[arg(long)]
        channel: Option<String>,

        #[arg(short, long, default_value_t = FEED_DEFAULT_PAGE_SIZE)]
        limit: usize,

        /// Cursor from a previous page
        #[arg(long)]
        cursor: Option<String>,
    },

    /// Look up a single cast by (short) hash
    Cast {
        hash: String,

        /// Author username, for links of the form <username>/<short hash>
        #[arg(short, long)]
        username: Option<String>,
    },

    /// Stored mutuals of a fid
    Mutuals { fid: u64 },

    /// Check whether two fids follow each other
    CheckMutual { fid1: u64, fid2: u64 },

    /// Fids followed by both accounts
    SharedFollows { fid1: u64, fid2: u64 },

    /// Pull recent casts into the store
    Refresh {
        /// Also refresh this user and the accounts they follow
        #[arg(short, long)]
        username: Option<String>,

        /// Comma-separated fids
        #[arg(long, value_delimiter = ',')]
        fids: Vec<u64>,
    },

    /// Store follow lists for fids without known mutuals
    BackfillFollows {
        #[arg(value_delimiter = ',', required = true)]
        fids: Vec<u64>,
    },

    /// Queue mutual checks between a fid and everyone it follows
    QueueMutuals { fid: u64 },

    /// Run queued mutual checks
    ProcessMutuals {
        #[arg(short, long, default_value_t = 100)]
        limit: usize,
    },

    /// Show cast index statistics
    Stats {
        /// Number of most active fids to list
        #[arg(short, long, default_value_t = 10)]
        top: usize,
    },

    /// Remove expired entries from the local cache
    PurgeCache,
}

/// Upstream APIs sharing one cache
struct Gateway {
    config: GatewayConfig,
    hub: HubApi,
    warpcast: WarpcastApi,
}

impl Gateway {
    fn open(config: GatewayConfig) -> anyhow::Result<Self> {
        let store = cache::open_store(&config).context("opening cache store")?;
        let cache = CacheAside::new(store, config.retry.policy());
        let hub = HubApi::from_config(&config.hub, cache.clone())?;
        let warpcast = WarpcastApi::from_config(&config.warpcast, cache)?;
        Ok(Self {
            config,
            hub,
            warpcast,
        })
    }

    fn store(&self) -> anyhow::Result<Arc<Store>> {
        Ok(Arc::new(
            Store::from_config(&self.config).context("opening relational store")?,
        ))
    }

    fn hydrator(&self) -> Hydrator {
        Hydrator::new(
            self.hub.clone(),
            self.warpcast.clone(),
            self.config.channel_exceptions.clone(),
        )
    }

    fn mutuals(&self) -> anyhow::Result<MutualsEngine<HubApi>> {
        Ok(MutualsEngine::new(self.hub.clone(), self.store()?))
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let verbosity = if cli.verbose {
        Verbosity::Verbose
    } else if cli.quiet {
        Verbosity::Quiet
    } else {
        Verbosity::Normal
    };
    if let Err(e) = logging::init(verbosity) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let metrics_file = cli.metrics_file.clone();
    let outcome = run(cli).await;

    if let Some(path) = metrics_file {
        if let Err(e) = metrics::write_metrics(&path) {
            tracing::warn!(path = %path.display(), error = %e, "Could not write metrics file");
        }
    }

    match outcome {
        Ok(data) => println!("{}", json!({ "success": true, "data": data })),
        Err(e) => {
            let precondition = matches!(
                e.downcast_ref::<GatewayError>(),
                Some(GatewayError::Precondition(_))
            );
            println!("{}", json!({ "success": false, "error": format!("{:#}", e) }));
            if !precondition {
                tracing::error!(error = %format!("{:#}", e), "Command failed");
            }
            process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<Value> {
    let config = GatewayConfig::load_or_default(cli.config.as_deref())?;
    let quiet = cli.quiet;
    let open = || Gateway::open(config.clone());

    let data = match cli.command {
        Commands::Feed {
            fids,
            channel,
            limit,
            cursor,
        } => {
            let gateway = open()?;
            let feeds = FeedService::new(gateway.store()?, gateway.hydrator());
            match channel {
                Some(channel) => serde_json::to_value(feeds.channel_feed(&channel, limit).await?)?,
                None => serde_json::to_value(
                    feeds.reverse_chron(&fids, limit, cursor.as_deref()).await?,
                )?,
            }
        }
        Commands::Cast { hash, username } => {
            let gateway = open()?;
            let feeds = FeedService::new(gateway.store()?, gateway.hydrator());
            let cast = match username {
                Some(username) => feeds.cast_by_app_uri(&username, &hash).await?,
                None => feeds.cast_by_hash(&hash).await?,
            };
            serde_json::to_value(cast)?
        }
        Commands::Mutuals { fid } => {
            json!({ "fid": fid, "mutuals": open()?.mutuals()?.get_mutuals(fid).await? })
        }
        Commands::CheckMutual { fid1, fid2 } => {
            let is_mutual = open()?.mutuals()?.compute_mutual(fid1, fid2).await?;
            json!({ "fid1": fid1, "fid2": fid2, "isMutual": is_mutual })
        }
        Commands::SharedFollows { fid1, fid2 } => {
            let shared = open()?.mutuals()?.get_mutuals_by_fids(fid1, fid2).await?;
            json!({ "fid1": fid1, "fid2": fid2, "shared": shared })
        }
        Commands::Refresh { username, fids } => {
            let gateway = open()?;
            let refresher = Refresher::new(
                gateway.hub.clone(),
                gateway.store()?,
                gateway.config.batch.clone(),
            );
            serde_json::to_value(refresher.refresh(username.as_deref(), &fids, quiet).await?)?
        }
        Commands::BackfillFollows { fids } => {
            serde_json::to_value(open()?.mutuals()?.backfill_follows(&fids, quiet).await)?
        }
        Commands::QueueMutuals { fid } => {
            json!({ "fid": fid, "queued": open()?.mutuals()?.queue_checks_for(fid).await? })
        }
        Commands::ProcessMutuals { limit } => {
            serde_json::to_value(open()?.mutuals()?.process_pending_checks(limit, quiet).await?)?
        }
        Commands::Stats { top } => {
            let store = Store::from_config(&config)?;
            serde_json::to_value(store.stats(top).await?)?
        }
        Commands::PurgeCache => purge_cache(&config).await?,
    };

    Ok(data)
}

async fn purge_cache(config: &GatewayConfig) -> anyhow::Result<Value> {
    if config.cache.backend != CacheBackendKind::Sqlite {
        anyhow::bail!(GatewayError::Config(
            "purge-cache only applies to the sqlite cache backend; the REST cache expires entries itself"
                .to_string(),
        ));
    }

    let store = SqliteCacheStore::new(SqliteCacheConfig {
        path: config.cache.path.clone(),
        ..Default::default()
    })?;
    let purged = store.purge_expired().await?;
    let stats = store.stats().await?;
    Ok(json!({ "purged": purged, "remaining": stats.entry_count }))
}
