//! Client-facing command types

use crate::protocol::message::Request;
use bytes::Bytes;

/// Command sent by an end client to the router
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// SET <key> <value>
    Set { key: String, value: Bytes },

    /// GET <key>
    Get { key: String },

    /// EXPIRE <key> <ttl>
    Expire { key: String, ttl: u64 },

    /// TTL <key>
    Ttl { key: String },
}

impl ClientCommand {
    /// Key used to pick the owning node
    pub fn key(&self) -> &str {
        match self {
            ClientCommand::Set { key, .. }
            | ClientCommand::Get { key }
            | ClientCommand::Expire { key, .. }
            | ClientCommand::Ttl { key } => key,
        }
    }

    /// Node request carrying this command
    pub fn into_request(self) -> Request {
        match self {
            ClientCommand::Set { key, value } => Request::Set { key, value },
            ClientCommand::Get { key } => Request::Get { key },
            ClientCommand::Expire { key, ttl } => Request::Expire { key, ttl },
            ClientCommand::Ttl { key } => Request::Ttl { key },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_request() {
        let cmd = ClientCommand::Expire {
            key: "A".to_string(),
            ttl: 10,
        };
        assert_eq!(cmd.key(), "A");
        assert_eq!(
            cmd.into_request(),
            Request::Expire {
                key: "A".to_string(),
                ttl: 10
            }
        );
    }
}
