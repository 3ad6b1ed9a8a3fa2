//! Request handlers for the node protocol

use super::CacheNode;
use crate::protocol::{Reply, Request};
use tracing::trace;

/// Apply a request to the node's store
pub fn execute(node: &CacheNode, request: Request) -> Reply {
    match request {
        Request::Get { key } => {
            node.metrics.cmd_get.inc();
            handle_get(node, &key)
        }
        Request::Set { key, value } => {
            node.metrics.cmd_set.inc();
            if let Some(evicted) = node.store.set(&key, value) {
                trace!(node = %node.id(), %key, %evicted, "SET evicted a key");
            }
            Reply::Ok
        }
        Request::Expire { key, ttl } => {
            node.metrics.cmd_expire.inc();
            Reply::Int(i64::from(node.store.expire(&key, ttl)))
        }
        Request::Ttl { key } => {
            node.metrics.cmd_ttl.inc();
            Reply::Int(node.store.ttl(&key))
        }
        Request::Delete { key } => {
            node.metrics.cmd_delete.inc();
            Reply::Int(i64::from(node.store.delete(&key)))
        }
    }
}

/// Handle GET; a miss is a successful `Nil`
fn handle_get(node: &CacheNode, key: &str) -> Reply {
    match node.store.get(key) {
        Some(value) => {
            node.metrics.get_hits.inc();
            Reply::Value(value)
        }
        None => {
            node.metrics.get_misses.inc();
            Reply::Nil
        }
    }
}
