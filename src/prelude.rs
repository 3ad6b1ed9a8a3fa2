//! Prelude module for common imports.
//!
//! # Usage
//!
//! ```ignore
//! use shardcache::prelude::*;
//! ```

// Error types
pub use crate::error::{BackupError, ProtocolError, Result, RoutingError, ShardCacheError};

// Configuration
pub use crate::config::{
    BackupConfig, CacheConfig, Config, MetricsConfig, NodeConfig, ProtocolConfig, RouterConfig,
};

// Storage
pub use crate::storage::{Persister, Store};

// Protocol
pub use crate::protocol::{ClientCommand, FrameCodec, Reply, Request, ResponseWriter};

// Ring
pub use crate::ring::{HashRing, SharedRing};

// Metrics
pub use crate::metrics::Metrics;

// Servers
pub use crate::node::CacheNode;
pub use crate::router::Router;

// Common external crates
pub use std::sync::Arc;
pub use tracing::{debug, error, info, trace, warn};
