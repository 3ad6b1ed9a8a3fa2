//! Prometheus metrics for ShardCache
//!
//! One instance is shared by the router and every node in the process.

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use tracing::error;

/// Global metrics instance
pub struct Metrics {
    pub registry: Registry,

    // Node command counters
    pub cmd_get: IntCounter,
    pub cmd_set: IntCounter,
    pub cmd_expire: IntCounter,
    pub cmd_ttl: IntCounter,
    pub cmd_delete: IntCounter,

    // Hit/miss counters
    pub get_hits: IntCounter,
    pub get_misses: IntCounter,

    // Store housekeeping
    pub evictions: IntCounter,
    pub expirations: IntCounter,
    pub backups_written: IntCounter,
    pub backup_errors: IntCounter,

    // Connection metrics
    pub node_connections: IntGauge,
    pub client_connections: IntGauge,
    pub total_connections: IntCounter,
    pub rejected_connections: IntCounter,

    // Bytes counters
    pub bytes_read: IntCounter,
    pub bytes_written: IntCounter,

    // Router
    pub requests_routed: IntCounter,
    pub forward_latency: Histogram,
    pub bad_requests: IntCounter,
    pub routing_errors: IntCounter,
    pub node_failures: IntCounterVec,
    pub nodes_removed: IntCounter,
    pub ring_nodes: IntGauge,

    // Error counters
    pub protocol_errors: IntCounter,
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let metric = IntCounter::new(name, help).expect("valid counter definition");
    registry
        .register(Box::new(metric.clone()))
        .expect("counter registered once");
    metric
}

fn gauge(registry: &Registry, name: &str, help: &str) -> IntGauge {
    let metric = IntGauge::new(name, help).expect("valid gauge definition");
    registry
        .register(Box::new(metric.clone()))
        .expect("gauge registered once");
    metric
}

impl Metrics {
    /// Create a new metrics instance
    pub fn new() -> Self {
        let registry = Registry::new();
        let r = &registry;

        let node_failures = IntCounterVec::new(
            Opts::new(
                "shardcache_node_failures_total",
                "Failed exchanges with a cache node",
            ),
            &["node"],
        )
        .expect("valid counter definition");
        registry
            .register(Box::new(node_failures.clone()))
            .expect("counter registered once");

        let forward_latency = Histogram::with_opts(
            HistogramOpts::new(
                "shardcache_forward_latency_seconds",
                "Router to node round trip in seconds",
            )
            .buckets(vec![
                0.0001, 0.0005, 0.001, 0.002, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0,
            ]),
        )
        .expect("valid histogram definition");
        registry
            .register(Box::new(forward_latency.clone()))
            .expect("histogram registered once");

        Self {
            cmd_get: counter(r, "shardcache_cmd_get_total", "Total GET commands"),
            cmd_set: counter(r, "shardcache_cmd_set_total", "Total SET commands"),
            cmd_expire: counter(r, "shardcache_cmd_expire_total", "Total EXPIRE commands"),
            cmd_ttl: counter(r, "shardcache_cmd_ttl_total", "Total TTL commands"),
            cmd_delete: counter(r, "shardcache_cmd_delete_total", "Total DELETE commands"),
            get_hits: counter(r, "shardcache_get_hits_total", "Total GET hits"),
            get_misses: counter(r, "shardcache_get_misses_total", "Total GET misses"),
            evictions: counter(r, "shardcache_evictions_total", "Keys evicted by LRU"),
            expirations: counter(r, "shardcache_expirations_total", "Keys removed by TTL"),
            backups_written: counter(r, "shardcache_backups_total", "Snapshots written"),
            backup_errors: counter(
                r,
                "shardcache_backup_errors_total",
                "Snapshot reads or writes that failed",
            ),
            node_connections: gauge(
                r,
                "shardcache_node_connections",
                "Current router connections into cache nodes",
            ),
            client_connections: gauge(
                r,
                "shardcache_client_connections",
                "Current client connections into the router",
            ),
            total_connections: counter(
                r,
                "shardcache_connections_total",
                "Total connections accepted",
            ),
            rejected_connections: counter(
                r,
                "shardcache_rejected_connections_total",
                "Total connections rejected",
            ),
            bytes_read: counter(r, "shardcache_bytes_read_total", "Total bytes read"),
            bytes_written: counter(r, "shardcache_bytes_written_total", "Total bytes written"),
            requests_routed: counter(
                r,
                "shardcache_requests_routed_total",
                "Requests forwarded to a node",
            ),
            bad_requests: counter(
                r,
                "shardcache_bad_requests_total",
                "Client commands rejected before routing",
            ),
            routing_errors: counter(
                r,
                "shardcache_routing_errors_total",
                "Requests that failed to reach a node",
            ),
            nodes_removed: counter(
                r,
                "shardcache_nodes_removed_total",
                "Nodes removed from the ring after repeated failures",
            ),
            ring_nodes: gauge(r, "shardcache_ring_nodes", "Nodes currently on the ring"),
            protocol_errors: counter(
                r,
                "shardcache_protocol_errors_total",
                "Total protocol errors",
            ),
            node_failures,
            forward_latency,
            registry,
        }
    }

    /// Get Prometheus formatted metrics
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            error!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Increments a gauge on creation and decrements it on drop, so early returns
/// from a connection task still release the count.
pub struct GaugeGuard(IntGauge);

impl GaugeGuard {
    pub fn inc(gauge: &IntGauge) -> Self {
        gauge.inc();
        Self(gauge.clone())
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.dec();
    }
}
