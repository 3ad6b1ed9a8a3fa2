//! Consistent hash ring with weighted virtual replicas
//!
//! A node of weight `w` owns `w` positions, at `hash("{node}_{i}")` for
//! `i in 0..w`. A key belongs to the first position at or after its own hash,
//! wrapping around to the smallest position.

use crate::RoutingError;
use parking_lot::RwLock;
use sha3::{Digest, Sha3_256};
use std::sync::Arc;

/// Ring shared between the router and the health endpoint
pub type SharedRing = Arc<RwLock<HashRing>>;

/// Stable 64-bit position of `key` on the ring.
///
/// Must not depend on the process (no random seeding), or the same key would
/// route differently across restarts.
pub fn ring_hash(key: &str) -> u64 {
    let digest = Sha3_256::digest(key.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

/// One virtual replica
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingEntry {
    pub position: u64,
    pub node: String,
}

/// Sorted ring of virtual replicas
#[derive(Debug, Clone, Default)]
pub struct HashRing {
    entries: Vec<RingEntry>,
}

impl HashRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a ring from `(node, weight)` pairs
    pub fn with_nodes<'a>(nodes: impl IntoIterator<Item = (&'a str, u32)>) -> Self {
        let mut ring = Self::new();
        for (node, weight) in nodes {
            ring.add_node(node, weight);
        }
        ring
    }

    pub fn into_shared(self) -> SharedRing {
        Arc::new(RwLock::new(self))
    }

    /// Add `weight` virtual replicas for `node`.
    ///
    /// Adding the same node twice duplicates its replicas.
    pub fn add_node(&mut self, node: &str, weight: u32) {
        self.entries.reserve(weight as usize);
        for i in 0..weight {
            let position = ring_hash(&format!("{node}_{i}"));
            let at = self.entries.partition_point(|e| e.position <= position);
            self.entries.insert(
                at,
                RingEntry {
                    position,
                    node: node.to_string(),
                },
            );
        }
    }

    /// Remove every replica of `node`; no-op if absent
    pub fn remove_node(&mut self, node: &str) {
        self.entries.retain(|e| e.node != node);
    }

    /// Node owning `key`
    pub fn get_node(&self, key: &str) -> Result<&str, RoutingError> {
        if self.entries.is_empty() {
            return Err(RoutingError::NoNodesAvailable);
        }
        let hash = ring_hash(key);
        let idx = self.entries.partition_point(|e| e.position < hash);
        let entry = self.entries.get(idx).unwrap_or(&self.entries[0]);
        Ok(&entry.node)
    }

    pub fn contains(&self, node: &str) -> bool {
        self.entries.iter().any(|e| e.node == node)
    }

    /// Distinct nodes on the ring, sorted by id
    pub fn nodes(&self) -> Vec<&str> {
        let mut nodes: Vec<&str> = self.entries.iter().map(|e| e.node.as_str()).collect();
        nodes.sort_unstable();
        nodes.dedup();
        nodes
    }

    /// Number of virtual replicas
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[RingEntry] {
        &self.entries
    }
}
