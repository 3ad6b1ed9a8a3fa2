//! Error types for ShardCache

use thiserror::Error;

/// Main error type for ShardCache
#[derive(Error, Debug)]
pub enum ShardCacheError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("Backup error: {0}")]
    Backup(#[from] BackupError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Framing, payload and client command errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid frame header: {0}")]
    InvalidHeader(String),

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Truncated payload")]
    Truncated,

    #[error("Trailing bytes after payload")]
    TrailingBytes,

    #[error("Payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("Unknown reply tag: {0}")]
    UnknownReplyTag(u8),

    #[error("unsupported command: {0}")]
    UnsupportedCommand(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("invalid ttl")]
    InvalidTtl,

    #[error("request too large: {size} bytes (limit {limit})")]
    RequestTooLarge { size: usize, limit: usize },
}

/// Errors raised while routing a request to its owning node
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("no nodes available")]
    NoNodesAvailable,

    #[error("node {node} unreachable: {reason}")]
    NodeUnreachable { node: String, reason: String },

    #[error("node {node} timed out")]
    Timeout { node: String },

    #[error("request of {size} bytes does not fit in one frame")]
    Oversized { size: usize },
}

impl RoutingError {
    /// Whether the error says something about the node rather than the request
    pub fn is_node_failure(&self) -> bool {
        matches!(self, Self::NodeUnreachable { .. } | Self::Timeout { .. })
    }
}

/// Snapshot read/write errors
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Backup IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt backup: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, ShardCacheError>;
