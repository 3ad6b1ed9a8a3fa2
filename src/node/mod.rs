//! Cache node: one store, one persister, served to the router over TCP

mod connection;
mod handler;

use crate::config::{Config, NodeConfig};
use crate::metrics::Metrics;
use crate::protocol::FrameCodec;
use crate::storage::{Persister, Store};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Cache node server
pub struct CacheNode {
    id: String,
    pub(crate) store: Store,
    persister: Option<Arc<Persister>>,
    pub(crate) codec: FrameCodec,
    pub(crate) read_buffer_size: usize,
    pub(crate) metrics: Arc<Metrics>,
    connection_semaphore: Arc<Semaphore>,
    pub(crate) cancel_token: CancellationToken,
}

impl CacheNode {
    /// Create a node and seed its store from the node's backup file, if any.
    ///
    /// A broken backup never fails this call; the node starts empty instead.
    pub async fn open(
        node: &NodeConfig,
        config: &Config,
        metrics: Arc<Metrics>,
        cancel_token: CancellationToken,
    ) -> Self {
        let store = Store::new(config.cache.lru_capacity, Arc::clone(&metrics));

        let persister = if config.backup.enabled {
            let persister = Persister::new(
                config.backup.path_for(node),
                Duration::from_secs(config.backup.interval_secs),
                Arc::clone(&metrics),
            );
            persister.restore_into(&store).await;
            Some(Arc::new(persister))
        } else {
            None
        };

        Self {
            id: node.addr.clone(),
            store,
            persister,
            codec: FrameCodec::new(&config.protocol),
            read_buffer_size: config.protocol.read_buffer_size,
            metrics,
            connection_semaphore: Arc::new(Semaphore::new(config.cache.max_connections)),
            cancel_token,
        }
    }

    /// Node id (`host:port`)
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Bind the node's own address and serve until cancelled
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let addr: SocketAddr = self.id.parse()?;
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve router connections on `listener` until cancelled
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        info!(
            node = %self.id,
            capacity = self.store.capacity(),
            "Cache node listening on {}",
            listener.local_addr()?
        );

        let backup_task = self
            .persister
            .as_ref()
            .map(|p| Arc::clone(p).spawn(self.store.clone(), self.cancel_token.clone()));

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!(node = %self.id, "Cache node shutting down");
                    break;
                }
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            // Disable Nagle's algorithm for lower latency
                            if let Err(e) = stream.set_nodelay(true) {
                                warn!("Failed to set TCP_NODELAY: {}", e);
                            }

                            // Try to acquire connection permit
                            match self.connection_semaphore.clone().try_acquire_owned() {
                                Ok(permit) => {
                                    self.metrics.total_connections.inc();
                                    debug!(node = %self.id, "Accepted connection from {}", peer_addr);

                                    let node = Arc::clone(&self);
                                    tokio::spawn(async move {
                                        if let Err(e) = connection::handle(node, stream, permit).await {
                                            debug!("Connection error: {}", e);
                                        }
                                    });
                                }
                                Err(_) => {
                                    // Connection limit reached
                                    self.metrics.rejected_connections.inc();
                                    warn!(node = %self.id, "Connection limit reached, rejecting connection from {}", peer_addr);
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

        // Wait for the final snapshot
        if let Some(task) = backup_task
            && let Err(e) = task.await
        {
            error!(node = %self.id, "Backup task failed: {}", e);
        }

        Ok(())
    }
}
