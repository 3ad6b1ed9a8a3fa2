//! Outbound connections from the router to cache nodes

use crate::RoutingError;
use crate::protocol::{FrameCodec, Reply, Request, read_frame};
use bytes::BytesMut;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// Idle node connections, keyed by node id
pub struct NodePool {
    idle: Mutex<HashMap<String, Vec<TcpStream>>>,
    max_idle_per_node: usize,
    timeout: Duration,
    codec: FrameCodec,
    read_buffer_size: usize,
}

impl NodePool {
    pub fn new(
        codec: FrameCodec,
        timeout: Duration,
        max_idle_per_node: usize,
        read_buffer_size: usize,
    ) -> Self {
        Self {
            idle: Mutex::new(HashMap::new()),
            max_idle_per_node,
            timeout,
            codec,
            read_buffer_size,
        }
    }

    /// Send one request to `node` and wait for its reply.
    ///
    /// The whole exchange, connect included, is bounded by the request
    /// timeout. A connection is returned to the pool only after a clean
    /// exchange. A request too large to frame fails before any I/O.
    pub async fn exchange(&self, node: &str, request: &Request) -> Result<Reply, RoutingError> {
        let mut frame = BytesMut::with_capacity(self.codec.header_size() + request.encoded_len());
        self.codec
            .encode(&request.to_bytes(), &mut frame)
            .map_err(|_| RoutingError::Oversized {
                size: request.encoded_len(),
            })?;

        let exchange = async {
            if let Some(mut stream) = self.checkout(node) {
                match self.round_trip(node, &mut stream, &frame).await {
                    Ok(reply) => return Ok((stream, reply)),
                    // The node may have closed an idle connection; retry once fresh
                    Err(e) => trace!(node, "Pooled connection failed: {}", e),
                }
            }
            let mut stream = self.connect(node).await?;
            let reply = self.round_trip(node, &mut stream, &frame).await?;
            Ok::<_, RoutingError>((stream, reply))
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok((stream, reply))) => {
                self.checkin(node, stream);
                Ok(reply)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(RoutingError::Timeout {
                node: node.to_string(),
            }),
        }
    }

    /// Drop every idle connection to `node`
    pub fn forget(&self, node: &str) {
        self.idle.lock().remove(node);
    }

    #[cfg(test)]
    fn idle_count(&self, node: &str) -> usize {
        self.idle.lock().get(node).map_or(0, Vec::len)
    }

    fn checkout(&self, node: &str) -> Option<TcpStream> {
        self.idle.lock().get_mut(node).and_then(Vec::pop)
    }

    fn checkin(&self, node: &str, stream: TcpStream) {
        let mut idle = self.idle.lock();
        let streams = idle.entry(node.to_string()).or_default();
        if streams.len() < self.max_idle_per_node {
            streams.push(stream);
        }
    }

    async fn connect(&self, node: &str) -> Result<TcpStream, RoutingError> {
        let stream = TcpStream::connect(node)
            .await
            .map_err(|e| node_unreachable(node, e))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(node, "Failed to set TCP_NODELAY: {}", e);
        }
        Ok(stream)
    }

    async fn round_trip(
        &self,
        node: &str,
        stream: &mut TcpStream,
        frame: &[u8],
    ) -> Result<Reply, RoutingError> {
        stream
            .write_all(frame)
            .await
            .map_err(|e| node_unreachable(node, e))?;

        let mut buf = BytesMut::with_capacity(self.read_buffer_size);
        let frame = read_frame(stream, &mut buf, &self.codec)
            .await
            .map_err(|e| node_unreachable(node, e))?
            .ok_or_else(|| node_unreachable(node, "connection closed"))?;

        Reply::decode(frame).map_err(|e| node_unreachable(node, format!("malformed reply: {e}")))
    }
}

fn node_unreachable(node: &str, reason: impl ToString) -> RoutingError {
    RoutingError::NodeUnreachable {
        node: node.to_string(),
        reason: reason.to_string(),
    }
}
