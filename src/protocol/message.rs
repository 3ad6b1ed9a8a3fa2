//! Router <-> cache node payloads
//!
//! Request: `[u8 name_len][name][fields...]`, fields per command:
//! - get / ttl / delete: `str key`
//! - set: `str key, bytes value`
//! - expire: `str key, u64 ttl`
//!
//! Reply: `[u8 tag][body]` with tags 0 Nil, 1 Ok, 2 Int(i64), 3 Value(bytes),
//! 4 Error(str).
//!
//! `str` and `bytes` are a little-endian `u32` length followed by the bytes.

use crate::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

const REPLY_NIL: u8 = 0;
const REPLY_OK: u8 = 1;
const REPLY_INT: u8 = 2;
const REPLY_VALUE: u8 = 3;
const REPLY_ERROR: u8 = 4;

/// Command forwarded to the node owning `key`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Get { key: String },
    Set { key: String, value: Bytes },
    Expire { key: String, ttl: u64 },
    Ttl { key: String },
    Delete { key: String },
}

impl Request {
    /// Command name as it travels on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Request::Get { .. } => "get",
            Request::Set { .. } => "set",
            Request::Expire { .. } => "expire",
            Request::Ttl { .. } => "ttl",
            Request::Delete { .. } => "delete",
        }
    }

    /// Routing key
    pub fn key(&self) -> &str {
        match self {
            Request::Get { key }
            | Request::Set { key, .. }
            | Request::Expire { key, .. }
            | Request::Ttl { key }
            | Request::Delete { key } => key,
        }
    }

    /// Size of the encoded request in bytes
    pub fn encoded_len(&self) -> usize {
        let body = match self {
            Request::Set { value, .. } => 4 + value.len(),
            Request::Expire { .. } => 8,
            Request::Get { .. } | Request::Ttl { .. } | Request::Delete { .. } => 0,
        };
        1 + self.name().len() + 4 + self.key().len() + body
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        let name = self.name();
        dst.put_u8(name.len() as u8);
        dst.put_slice(name.as_bytes());
        put_bytes(dst, self.key().as_bytes());
        match self {
            Request::Set { value, .. } => put_bytes(dst, value),
            Request::Expire { ttl, .. } => dst.put_u64_le(*ttl),
            Request::Get { .. } | Request::Ttl { .. } | Request::Delete { .. } => {}
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decode a request; the command name is matched case-insensitively
    pub fn decode(mut payload: Bytes) -> Result<Self, ProtocolError> {
        let name_len = take_u8(&mut payload)? as usize;
        let name = take_str(&mut payload, name_len)?.to_ascii_lowercase();

        let request = match name.as_str() {
            "get" => Request::Get {
                key: take_key(&mut payload)?,
            },
            "set" => {
                let key = take_key(&mut payload)?;
                let len = take_u32(&mut payload)? as usize;
                let value = take_bytes(&mut payload, len)?;
                Request::Set { key, value }
            }
            "expire" => {
                let key = take_key(&mut payload)?;
                if payload.remaining() < 8 {
                    return Err(ProtocolError::Truncated);
                }
                Request::Expire {
                    key,
                    ttl: payload.get_u64_le(),
                }
            }
            "ttl" => Request::Ttl {
                key: take_key(&mut payload)?,
            },
            "delete" => Request::Delete {
                key: take_key(&mut payload)?,
            },
            _ => return Err(ProtocolError::UnsupportedCommand(name)),
        };

        if payload.has_remaining() {
            return Err(ProtocolError::TrailingBytes);
        }
        Ok(request)
    }
}

/// Node reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Absent key
    Nil,
    Ok,
    Int(i64),
    Value(Bytes),
    /// Application-level error raised by the node
    Error(String),
}

impl Reply {
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Reply::Nil => dst.put_u8(REPLY_NIL),
            Reply::Ok => dst.put_u8(REPLY_OK),
            Reply::Int(n) => {
                dst.put_u8(REPLY_INT);
                dst.put_i64_le(*n);
            }
            Reply::Value(data) => {
                dst.put_u8(REPLY_VALUE);
                put_bytes(dst, data);
            }
            Reply::Error(msg) => {
                dst.put_u8(REPLY_ERROR);
                put_bytes(dst, msg.as_bytes());
            }
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    pub fn decode(mut payload: Bytes) -> Result<Self, ProtocolError> {
        let reply = match take_u8(&mut payload)? {
            REPLY_NIL => Reply::Nil,
            REPLY_OK => Reply::Ok,
            REPLY_INT => {
                if payload.remaining() < 8 {
                    return Err(ProtocolError::Truncated);
                }
                Reply::Int(payload.get_i64_le())
            }
            REPLY_VALUE => {
                let len = take_u32(&mut payload)? as usize;
                Reply::Value(take_bytes(&mut payload, len)?)
            }
            REPLY_ERROR => {
                let len = take_u32(&mut payload)? as usize;
                Reply::Error(take_str(&mut payload, len)?)
            }
            tag => return Err(ProtocolError::UnknownReplyTag(tag)),
        };

        if payload.has_remaining() {
            return Err(ProtocolError::TrailingBytes);
        }
        Ok(reply)
    }
}

fn put_bytes(dst: &mut BytesMut, data: &[u8]) {
    dst.put_u32_le(data.len() as u32);
    dst.put_slice(data);
}

fn take_u8(buf: &mut Bytes) -> Result<u8, ProtocolError> {
    if buf.remaining() < 1 {
        return Err(ProtocolError::Truncated);
    }
    Ok(buf.get_u8())
}

fn take_u32(buf: &mut Bytes) -> Result<u32, ProtocolError> {
    if buf.remaining() < 4 {
        return Err(ProtocolError::Truncated);
    }
    Ok(buf.get_u32_le())
}

fn take_bytes(buf: &mut Bytes, len: usize) -> Result<Bytes, ProtocolError> {
    if buf.remaining() < len {
        return Err(ProtocolError::Truncated);
    }
    Ok(buf.split_to(len))
}

fn take_str(buf: &mut Bytes, len: usize) -> Result<String, ProtocolError> {
    let raw = take_bytes(buf, len)?;
    String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
}

fn take_key(buf: &mut Bytes) -> Result<String, ProtocolError> {
    let len = take_u32(buf)? as usize;
    take_str(buf, len)
}
