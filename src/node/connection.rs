//! Connection handling for individual router connections

use super::CacheNode;
use super::handler;
use crate::ShardCacheError;
use crate::metrics::GaugeGuard;
use crate::protocol::{Reply, Request, read_frame, write_frame};
use bytes::BytesMut;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::OwnedSemaphorePermit;
use tracing::debug;

/// Handle a single router connection
pub async fn handle(
    node: Arc<CacheNode>,
    mut stream: TcpStream,
    _permit: OwnedSemaphorePermit,
) -> anyhow::Result<()> {
    let _active = GaugeGuard::inc(&node.metrics.node_connections);
    let mut read_buf = BytesMut::with_capacity(node.read_buffer_size);

    loop {
        let frame = tokio::select! {
            biased;
            _ = node.cancel_token.cancelled() => break,
            frame = read_frame(&mut stream, &mut read_buf, &node.codec) => frame,
        };

        let payload = match frame {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                // Connection closed
                break;
            }
            Err(ShardCacheError::Io(e)) => {
                debug!("Read error: {}", e);
                break;
            }
            Err(e) => {
                // Framing is lost, nothing left to resynchronise on
                node.metrics.protocol_errors.inc();
                debug!(node = %node.id(), "Closing connection: {}", e);
                break;
            }
        };

        node.metrics
            .bytes_read
            .inc_by((node.codec.header_size() + payload.len()) as u64);

        let reply = match Request::decode(payload) {
            Ok(request) => handler::execute(&node, request),
            Err(e) => {
                node.metrics.protocol_errors.inc();
                debug!(node = %node.id(), "Rejected request: {}", e);
                Reply::Error(e.to_string())
            }
        };

        let written = write_frame(&mut stream, &node.codec, &reply.to_bytes()).await?;
        node.metrics.bytes_written.inc_by(written as u64);
    }

    Ok(())
}
