//! castgate - Read-through caching gateway for Farcaster data
//!
//! castgate sits between callers and slow, rate-limited upstreams (a hub's
//! HTTP API and the social app's API). Upstream reads go through a TTL cache;
//! casts and follow edges are indexed in SQLite so feeds and mutual-follow
//! sets can be served with predictable latency.
//!
//! # Architecture
//!
//! - **cache**: Cache store backends, cache-aside resolver, page collector
//! - **retry**: Exponential backoff around upstream calls
//! - **storage**: Cast index, follow edges, mutual-check queue (SQLite)
//! - **upstream**: Cached hub and social-app APIs
//! - **hydration**: Denormalized cast and user views
//! - **mutuals**: Mutual-follow computation and graph maintenance
//! - **feed**: Reverse-chronological and channel feeds, batch refresh

// Core modules
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod retry;

// Data access
pub mod cache;
pub mod storage;
pub mod upstream;

// Derived views
pub mod feed;
pub mod hydration;
pub mod mutuals;

// Re-exports
pub use error::{GatewayError, Result};
