//! Client connection handling

use super::Router;
use crate::ShardCacheError;
use crate::metrics::GaugeGuard;
use crate::protocol::{ResponseWriter, parse, read_frame, write_frame};
use bytes::BytesMut;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::OwnedSemaphorePermit;
use tracing::debug;

/// Handle a single client connection
pub async fn handle(
    router: Arc<Router>,
    mut stream: TcpStream,
    _permit: OwnedSemaphorePermit,
) -> anyhow::Result<()> {
    let _active = GaugeGuard::inc(&router.metrics.client_connections);
    let mut read_buf = BytesMut::with_capacity(router.read_buffer_size);
    let mut writer = ResponseWriter::new(256);

    loop {
        let frame = tokio::select! {
            biased;
            _ = router.cancel_token.cancelled() => break,
            frame = read_frame(&mut stream, &mut read_buf, &router.codec) => frame,
        };

        let payload = match frame {
            Ok(Some(payload)) => payload,
            Ok(None) => break,
            Err(ShardCacheError::Io(e)) => {
                debug!("Read error: {}", e);
                break;
            }
            Err(e) => {
                router.metrics.protocol_errors.inc();
                debug!("Closing client connection: {}", e);
                break;
            }
        };

        router
            .metrics
            .bytes_read
            .inc_by((router.codec.header_size() + payload.len()) as u64);

        let outcome = match parse(&payload) {
            Ok(command) => router.route(command).await,
            Err(e) => Err(e.into()),
        };

        match outcome {
            Ok(reply) => writer.reply(&reply),
            Err(ShardCacheError::Protocol(e)) => {
                // Never reaches the ring or the health records
                router.metrics.bad_requests.inc();
                writer.client_error(&e.to_string());
            }
            Err(e) => {
                router.metrics.routing_errors.inc();
                writer.server_error(&e.to_string());
            }
        }

        let mut response = writer.take();
        if response.len() > router.codec.max_payload_size() {
            debug!(size = response.len(), "Reply does not fit in one frame");
            writer.server_error("reply too large");
            response = writer.take();
        }
        let written = write_frame(&mut stream, &router.codec, &response).await?;
        router.metrics.bytes_written.inc_by(written as u64);
    }

    Ok(())
}
