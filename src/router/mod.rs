//! Client-facing router
//!
//! Parses client commands, picks the owning node on the ring and forwards the
//! request. Nodes that fail `health_threshold` exchanges in a row are taken
//! off the ring for good.

mod connection;
mod pool;
mod tracker;

pub use pool::NodePool;
pub use tracker::{HealthState, HealthTracker};

use crate::config::Config;
use crate::metrics::Metrics;
use crate::protocol::{ClientCommand, FrameCodec, Reply, Request};
use crate::ring::{HashRing, SharedRing};
use crate::{ProtocolError, RoutingError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Router server
pub struct Router {
    listen_addr: String,
    ring: SharedRing,
    health: HealthTracker,
    pool: NodePool,
    pub(crate) codec: FrameCodec,
    pub(crate) read_buffer_size: usize,
    pub(crate) metrics: Arc<Metrics>,
    client_semaphore: Arc<Semaphore>,
    pub(crate) cancel_token: CancellationToken,
}

impl Router {
    /// Create a router over every configured node
    pub fn new(config: &Config, metrics: Arc<Metrics>, cancel_token: CancellationToken) -> Self {
        let ring = HashRing::with_nodes(config.nodes.iter().map(|n| (n.addr.as_str(), n.weight)));
        metrics.ring_nodes.set(ring.nodes().len() as i64);

        let codec = FrameCodec::new(&config.protocol);
        Self {
            listen_addr: config.router.listen_addr.clone(),
            ring: ring.into_shared(),
            health: HealthTracker::new(
                config.router.health_threshold,
                config.nodes.iter().map(|n| n.addr.as_str()),
            ),
            pool: NodePool::new(
                codec.clone(),
                Duration::from_secs(config.router.request_timeout_secs),
                config.router.max_idle_per_node,
                config.protocol.read_buffer_size,
            ),
            codec,
            read_buffer_size: config.protocol.read_buffer_size,
            metrics,
            client_semaphore: Arc::new(Semaphore::new(config.router.max_clients)),
            cancel_token,
        }
    }

    /// Ring shared with the health endpoint
    pub fn ring(&self) -> &SharedRing {
        &self.ring
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    /// Forward `command` to the node owning its key.
    ///
    /// Requests that cannot be framed fail with a protocol error before the
    /// ring is consulted. Node failures update the node's health record.
    pub async fn route(&self, command: ClientCommand) -> crate::Result<Reply> {
        let request = self.admit(command)?;
        let node = self.ring.read().get_node(request.key())?.to_string();
        debug!(node = %node, command = request.name(), key = request.key(), "Routing");

        let start = Instant::now();
        match self.pool.exchange(&node, &request).await {
            Ok(reply) => {
                self.metrics
                    .forward_latency
                    .observe(start.elapsed().as_secs_f64());
                self.metrics.requests_routed.inc();
                self.record_success(&node);
                Ok(reply)
            }
            Err(e) => {
                if e.is_node_failure() {
                    self.record_failure(&node, &e);
                }
                Err(e.into())
            }
        }
    }

    /// Node request for `command`, rejected if it would not fit in one frame
    fn admit(&self, command: ClientCommand) -> Result<Request, ProtocolError> {
        let request = command.into_request();
        let size = request.encoded_len();
        let limit = self.codec.max_payload_size();
        if size > limit {
            return Err(ProtocolError::RequestTooLarge { size, limit });
        }
        Ok(request)
    }

    fn record_success(&self, node: &str) {
        if let HealthState::Degraded(failures) = self.health.record_success(node) {
            info!(node, failures, "Node recovered");
        }
    }

    fn record_failure(&self, node: &str, cause: &RoutingError) {
        self.metrics.node_failures.with_label_values(&[node]).inc();
        self.pool.forget(node);

        // Ring write lock is taken under the tracker lock so no lookup sees a
        // node past its threshold.
        let state = self.health.record_failure(node, |node| {
            let mut ring = self.ring.write();
            ring.remove_node(node);
            self.metrics.ring_nodes.set(ring.nodes().len() as i64);
            self.metrics.nodes_removed.inc();
        });

        match state {
            HealthState::Degraded(failures) => {
                warn!(node, failures, threshold = self.health.threshold(), "Node request failed: {}", cause);
            }
            HealthState::Removed => {
                error!(node, "Removing node from ring: {}", cause);
            }
            HealthState::Healthy => {}
        }
    }

    /// Bind the configured client address and serve until cancelled
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.listen_addr).await?;
        self.serve(listener).await
    }

    /// Serve clients on `listener` until cancelled
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        info!(
            "Router listening on {} ({} nodes)",
            listener.local_addr()?,
            self.ring.read().nodes().len()
        );

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Router shutting down");
                    break;
                }
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                warn!("Failed to set TCP_NODELAY: {}", e);
                            }

                            match self.client_semaphore.clone().try_acquire_owned() {
                                Ok(permit) => {
                                    self.metrics.total_connections.inc();
                                    debug!("Accepted client {}", peer_addr);

                                    let router = Arc::clone(&self);
                                    tokio::spawn(async move {
                                        if let Err(e) = connection::handle(router, stream, permit).await {
                                            debug!("Client connection error: {}", e);
                                        }
                                    });
                                }
                                Err(_) => {
                                    self.metrics.rejected_connections.inc();
                                    warn!("Client limit reached, rejecting connection from {}", peer_addr);
                                    drop(stream);
                                }
                            }
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ShardCacheError;
    use crate::config::NodeConfig;
    use bytes::Bytes;

    /// Addresses nothing listens on
    async fn dead_addrs(n: usize) -> Vec<String> {
        let mut addrs = Vec::new();
        for _ in 0..n {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            addrs.push(listener.local_addr().unwrap().to_string());
        }
        addrs
    }

    fn config(nodes: &[String], threshold: u32) -> Config {
        let mut config = Config::default();
        config.router.health_threshold = threshold;
        config.nodes = nodes.iter().map(|a| NodeConfig::new(a.as_str(), 3)).collect();
        config
    }

    fn router(nodes: &[String], threshold: u32) -> Router {
        Router::new(
            &config(nodes, threshold),
            Arc::new(Metrics::new()),
            CancellationToken::new(),
        )
    }

    fn get(key: &str) -> ClientCommand {
        ClientCommand::Get {
            key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn test_empty_ring() {
        let router = router(&[], 5);
        assert!(matches!(
            router.route(get("A")).await,
            Err(ShardCacheError::Routing(RoutingError::NoNodesAvailable))
        ));
    }

    #[tokio::test]
    async fn test_threshold_removes_node() {
        let nodes = dead_addrs(2).await;
        let router = router(&nodes, 3);
        let owner = router.ring().read().get_node("A").unwrap().to_string();

        for expected in 1..3 {
            assert!(router.route(get("A")).await.is_err());
            assert_eq!(router.health().state(&owner), HealthState::Degraded(expected));
            assert!(router.ring().read().contains(&owner));
        }

        assert!(router.route(get("A")).await.is_err());
        assert_eq!(router.health().state(&owner), HealthState::Removed);
        assert!(!router.ring().read().contains(&owner));
        assert_eq!(router.metrics.nodes_removed.get(), 1);
        assert_eq!(router.metrics.ring_nodes.get(), 1);

        // "A" now belongs to the survivor
        let survivor = router.ring().read().get_node("A").unwrap().to_string();
        assert_ne!(survivor, owner);
    }

    #[tokio::test]
    async fn test_all_nodes_removed() {
        let nodes = dead_addrs(1).await;
        let router = router(&nodes, 1);

        assert!(matches!(
            router.route(get("A")).await,
            Err(ShardCacheError::Routing(RoutingError::NodeUnreachable { .. }))
        ));
        assert!(matches!(
            router.route(get("A")).await,
            Err(ShardCacheError::Routing(RoutingError::NoNodesAvailable))
        ));
    }

    #[tokio::test]
    async fn test_oversized_request_leaves_health_alone() {
        let nodes = dead_addrs(1).await;
        let mut config = config(&nodes, 1);
        config.protocol.max_payload_size = 64;
        let router = Router::new(&config, Arc::new(Metrics::new()), CancellationToken::new());

        // A 64-byte client frame that grows to 71 bytes as a node request
        let command = ClientCommand::Set {
            key: "A".to_string(),
            value: Bytes::from(vec![b'x'; 58]),
        };
        for _ in 0..3 {
            assert!(matches!(
                router.route(command.clone()).await,
                Err(ShardCacheError::Protocol(ProtocolError::RequestTooLarge {
                    size: 71,
                    limit: 64
                }))
            ));
        }

        assert_eq!(router.health().state(&nodes[0]), HealthState::Healthy);
        assert!(router.ring().read().contains(&nodes[0]));
        assert_eq!(router.metrics.node_failures.with_label_values(&[nodes[0].as_str()]).get(), 0);
    }
}
