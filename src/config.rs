//! Configuration for ShardCache
//!
//! Built once at startup and handed to each component's constructor.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub router: RouterConfig,
    pub cache: CacheConfig,
    pub nodes: Vec<NodeConfig>,
    pub backup: BackupConfig,
    pub protocol: ProtocolConfig,
    pub metrics: MetricsConfig,
}

/// Router configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Address clients connect to
    pub listen_addr: String,

    /// Maximum number of concurrent client connections
    pub max_clients: usize,

    /// Timeout for one exchange with a cache node, in seconds
    pub request_timeout_secs: u64,

    /// Consecutive failures before a node is removed from the ring
    pub health_threshold: u32,

    /// Idle connections kept open per cache node
    pub max_idle_per_node: usize,

    /// Number of Tokio worker threads (0 = number of CPUs)
    pub worker_threads: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:6600".to_string(),
            max_clients: 100,
            request_timeout_secs: 5,
            health_threshold: 5,
            max_idle_per_node: 8,
            worker_threads: 0,
        }
    }
}

/// Settings shared by every cache node
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries per node
    pub lru_capacity: usize,

    /// Maximum number of concurrent connections per node
    pub max_connections: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            lru_capacity: 100,
            max_connections: 100,
        }
    }
}

/// One member of the node pool
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NodeConfig {
    /// `host:port`, doubles as the node id on the ring
    pub addr: String,

    /// Number of virtual replicas on the ring
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    3
}

impl NodeConfig {
    pub fn new(addr: impl Into<String>, weight: u32) -> Self {
        Self {
            addr: addr.into(),
            weight,
        }
    }

    /// Split `addr` into host and port. Falls back to the whole string as host.
    pub fn host_port(&self) -> (&str, &str) {
        match self.addr.rsplit_once(':') {
            Some((host, port)) => (host, port),
            None => (self.addr.as_str(), ""),
        }
    }
}

/// Backup (snapshot) configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Enable startup restore and periodic snapshots
    pub enabled: bool,

    /// Directory holding one snapshot file per node
    pub dir: PathBuf,

    /// Prefix of each snapshot file name
    pub file_prefix: String,

    /// Seconds between snapshots
    pub interval_secs: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("./backup"),
            file_prefix: "_bc_".to_string(),
            interval_secs: 10,
        }
    }
}

impl BackupConfig {
    /// Snapshot path for a node: `<dir>/<prefix><host without dots><port>`
    pub fn path_for(&self, node: &NodeConfig) -> PathBuf {
        let (host, port) = node.host_port();
        let name = format!("{}{}{}", self.file_prefix, host.replace('.', ""), port);
        self.dir.join(name)
    }
}

/// Wire framing configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Fixed width of the length header in bytes
    pub max_header_size: usize,

    /// Largest payload accepted from a peer
    pub max_payload_size: usize,

    /// Read buffer size per connection (bytes)
    pub read_buffer_size: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_header_size: 128,
            max_payload_size: 16 * 1024 * 1024,
            read_buffer_size: 8192,
        }
    }
}

/// Metrics and health check configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics collection
    pub enabled: bool,

    /// Address for metrics/health HTTP server
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1:9090".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            crate::ShardCacheError::Config(format!("Failed to read config file: {e}"))
        })?;

        Self::from_toml(&contents)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(contents: &str) -> crate::Result<Self> {
        let mut config: Self = toml::from_str(contents)
            .map_err(|e| crate::ShardCacheError::Config(format!("Failed to parse config: {e}")))?;
        config.fill_default_pool();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables or use defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.fill_default_pool();

        if let Ok(addr) = std::env::var("SHARDCACHE_LISTEN_ADDR") {
            config.router.listen_addr = addr;
        }

        if let Ok(pool) = std::env::var("SHARDCACHE_NODES") {
            // addr[=weight],addr[=weight],...
            let nodes: Vec<NodeConfig> = pool
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|entry| match entry.trim().split_once('=') {
                    Some((addr, weight)) => {
                        NodeConfig::new(addr, weight.parse().unwrap_or_else(|_| default_weight()))
                    }
                    None => NodeConfig::new(entry.trim(), default_weight()),
                })
                .collect();
            if !nodes.is_empty() {
                config.nodes = nodes;
            }
        }

        if let Ok(capacity) = std::env::var("SHARDCACHE_LRU_CAPACITY")
            && let Ok(n) = capacity.parse()
        {
            config.cache.lru_capacity = n;
        }

        if let Ok(threshold) = std::env::var("SHARDCACHE_HEALTH_THRESHOLD")
            && let Ok(n) = threshold.parse()
        {
            config.router.health_threshold = n;
        }

        if let Ok(dir) = std::env::var("SHARDCACHE_BACKUP_DIR") {
            config.backup.dir = PathBuf::from(dir);
        }

        if let Ok(addr) = std::env::var("SHARDCACHE_METRICS_ADDR") {
            config.metrics.listen_addr = addr;
        }

        if let Ok(enabled) = std::env::var("SHARDCACHE_METRICS_ENABLED") {
            config.metrics.enabled = enabled.to_lowercase() == "true" || enabled == "1";
        }

        config
    }

    fn fill_default_pool(&mut self) {
        if self.nodes.is_empty() {
            self.nodes = ["127.0.0.1:30008", "127.0.0.1:30009", "127.0.0.1:30010"]
                .into_iter()
                .map(|addr| NodeConfig::new(addr, default_weight()))
                .collect();
        }
    }

    /// Reject values the rest of the system cannot work with
    pub fn validate(&self) -> crate::Result<()> {
        let invalid = |msg: String| Err(crate::ShardCacheError::Config(msg));

        if self.nodes.is_empty() {
            return invalid("node pool is empty".to_string());
        }
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.weight == 0 {
                return invalid(format!("node {} has weight 0", node.addr));
            }
            if !seen.insert(node.addr.as_str()) {
                return invalid(format!("node {} listed twice", node.addr));
            }
        }
        if self.cache.lru_capacity == 0 {
            return invalid("cache.lru_capacity must be at least 1".to_string());
        }
        if self.router.health_threshold == 0 {
            return invalid("router.health_threshold must be at least 1".to_string());
        }
        if self.backup.interval_secs == 0 {
            return invalid("backup.interval_secs must be at least 1".to_string());
        }
        // The header has to fit the decimal length of the largest payload.
        let digits = self.protocol.max_payload_size.to_string().len();
        if self.protocol.max_header_size < digits {
            return invalid(format!(
                "protocol.max_header_size {} cannot hold a length of {}",
                self.protocol.max_header_size, self.protocol.max_payload_size
            ));
        }
        Ok(())
    }
}
