//! Text reply builder for the client protocol

use crate::protocol::message::Reply;
use bytes::BytesMut;
use itoa::Buffer;

/// Response writer for the client text protocol
pub struct ResponseWriter {
    buf: BytesMut,
}

impl ResponseWriter {
    /// Create a new response writer with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Get the internal buffer
    #[cfg(test)]
    pub fn buffer(&self) -> &[u8] {
        &self.buf
    }

    /// Take the buffer, leaving an empty buffer in its place
    pub fn take(&mut self) -> BytesMut {
        std::mem::take(&mut self.buf)
    }

    /// Render a node reply
    pub fn reply(&mut self, reply: &Reply) {
        match reply {
            Reply::Nil => self.nil(),
            Reply::Ok => self.ok(),
            Reply::Int(n) => self.integer(*n),
            Reply::Value(data) => self.value(data),
            Reply::Error(msg) => self.server_error(msg),
        }
    }

    /// Write OK
    pub fn ok(&mut self) {
        self.buf.extend_from_slice(b"OK");
    }

    /// Write NIL for an absent key
    pub fn nil(&mut self) {
        self.buf.extend_from_slice(b"NIL");
    }

    /// Format: VALUE <data>
    pub fn value(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(b"VALUE ");
        self.buf.extend_from_slice(data);
    }

    /// Format: INTEGER <n>
    pub fn integer(&mut self, n: i64) {
        let mut itoa_buf = Buffer::new();
        self.buf.extend_from_slice(b"INTEGER ");
        self.buf.extend_from_slice(itoa_buf.format(n).as_bytes());
    }

    /// Write BAD REQUEST response (client error, nothing was routed)
    pub fn client_error(&mut self, message: &str) {
        self.buf.extend_from_slice(b"BAD REQUEST ");
        self.buf.extend_from_slice(message.as_bytes());
    }

    /// Write SERVER_ERROR response
    pub fn server_error(&mut self, message: &str) {
        self.buf.extend_from_slice(b"SERVER_ERROR ");
        self.buf.extend_from_slice(message.as_bytes());
    }
}

impl Default for ResponseWriter {
    fn default() -> Self {
        Self::new(4096)
    }
}
