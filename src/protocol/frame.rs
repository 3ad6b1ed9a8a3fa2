//! Length-header framing shared by every socket in the cluster
//!
//! A frame is a fixed-width header holding the ASCII decimal payload length,
//! left-justified and padded with spaces, followed by exactly that many
//! payload bytes.

use crate::ProtocolError;
use crate::config::ProtocolConfig;
use bytes::{Buf, Bytes, BytesMut};
use itoa::Buffer;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Result of decoding the front of a read buffer
#[derive(Debug, PartialEq, Eq)]
pub enum FrameResult {
    /// Payload occupies `payload_start..consumed`
    Complete { payload_start: usize, consumed: usize },
    /// A header made only of padding; skip `usize` bytes and keep reading
    Empty(usize),
    /// Need more data to complete the frame
    NeedMoreData,
    /// Malformed header
    Error(ProtocolError),
}

/// Frame encoder/decoder
#[derive(Debug, Clone)]
pub struct FrameCodec {
    header_size: usize,
    max_payload_size: usize,
}

impl FrameCodec {
    pub fn new(config: &ProtocolConfig) -> Self {
        Self {
            header_size: config.max_header_size,
            max_payload_size: config.max_payload_size,
        }
    }

    pub fn header_size(&self) -> usize {
        self.header_size
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    /// Decode one frame from the front of `buf` without consuming it
    pub fn decode(&self, buf: &[u8]) -> FrameResult {
        if buf.len() < self.header_size {
            return FrameResult::NeedMoreData;
        }

        let header = &buf[..self.header_size];
        let digits = header.trim_ascii();
        let digits = match memchr::memchr(0, digits) {
            Some(nul) => digits[..nul].trim_ascii(),
            None => digits,
        };

        if digits.is_empty() {
            return FrameResult::Empty(self.header_size);
        }

        let len = match parse_length(digits) {
            Some(len) => len,
            None => {
                return FrameResult::Error(ProtocolError::InvalidHeader(
                    String::from_utf8_lossy(digits).to_string(),
                ));
            }
        };

        if len > self.max_payload_size {
            return FrameResult::Error(ProtocolError::PayloadTooLarge(len));
        }

        let consumed = self.header_size + len;
        if buf.len() < consumed {
            return FrameResult::NeedMoreData;
        }

        FrameResult::Complete {
            payload_start: self.header_size,
            consumed,
        }
    }

    /// Append a framed `payload` to `dst`
    pub fn encode(&self, payload: &[u8], dst: &mut BytesMut) -> Result<(), ProtocolError> {
        if payload.len() > self.max_payload_size {
            return Err(ProtocolError::PayloadTooLarge(payload.len()));
        }

        let mut itoa_buf = Buffer::new();
        let digits = itoa_buf.format(payload.len()).as_bytes();
        if digits.len() > self.header_size {
            return Err(ProtocolError::PayloadTooLarge(payload.len()));
        }

        dst.reserve(self.header_size + payload.len());
        dst.extend_from_slice(digits);
        dst.resize(dst.len() + self.header_size - digits.len(), b' ');
        dst.extend_from_slice(payload);
        Ok(())
    }
}

/// Read the next frame payload.
///
/// Returns `Ok(None)` when the peer closes the connection at a frame boundary.
/// Partial data stays in `buf`, so dropping this future between reads loses
/// nothing.
pub async fn read_frame<R>(
    reader: &mut R,
    buf: &mut BytesMut,
    codec: &FrameCodec,
) -> crate::Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    loop {
        match codec.decode(buf) {
            FrameResult::Complete {
                payload_start,
                consumed,
            } => {
                let frame = buf.split_to(consumed).freeze();
                return Ok(Some(frame.slice(payload_start..)));
            }
            FrameResult::Empty(skip) => {
                buf.advance(skip);
            }
            FrameResult::NeedMoreData => {
                if reader.read_buf(buf).await? == 0 {
                    if buf.is_empty() {
                        return Ok(None);
                    }
                    return Err(ProtocolError::Truncated.into());
                }
            }
            FrameResult::Error(e) => return Err(e.into()),
        }
    }
}

/// Frame `payload` and write it out
pub async fn write_frame<W>(writer: &mut W, codec: &FrameCodec, payload: &[u8]) -> crate::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let mut out = BytesMut::with_capacity(codec.header_size() + payload.len());
    codec.encode(payload, &mut out)?;
    writer.write_all(&out).await?;
    Ok(out.len())
}

/// Parse ASCII decimal digits
fn parse_length(digits: &[u8]) -> Option<usize> {
    if !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}
