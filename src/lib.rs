//! # ShardCache
//!
//! Sharded in-memory key-value cache. A router spreads keys over a pool of
//! cache nodes with a consistent hash ring and drops nodes that keep failing.
//!
//! ## Features
//!
//! - Text client protocol (SET, GET, EXPIRE, TTL) over length-framed TCP
//! - Weighted consistent hashing with virtual replicas
//! - Per-node LRU eviction with per-key TTL
//! - Periodic snapshots per node, restored on start
//! - Prometheus metrics and health endpoints
//!
//! ## Example
//!
//! ```ignore
//! use shardcache::config::Config;
//! use shardcache::router::Router;
//!
//! let config = Config::from_file("shardcache.toml")?;
//! let router = Arc::new(Router::new(&config, metrics, cancel_token));
//! router.run().await?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//!                                  ┌──────────────────────────┐
//!                             ┌───▶│ node 127.0.0.1:30008     │
//! ┌────────┐    ┌──────────┐  │    │  ├─ LRU + TTL store      │
//! │ client │───▶│ router   │──┼───▶│  └─ backup persister     │
//! └────────┘    │ (ring,   │  │    └──────────────────────────┘
//!               │  health) │  └───▶ node 127.0.0.1:30009 ...
//!               └──────────┘
//! ```

// Modules
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod node;
pub mod prelude;
pub mod protocol;
pub mod ring;
pub mod router;
pub mod storage;

// Re-exports for convenience
pub use error::{BackupError, ProtocolError, Result, RoutingError, ShardCacheError};
