//! Per-node storage: LRU map, TTL store and snapshots

pub mod backup;
mod lru;
mod store;


pub use backup::Persister;
pub use lru::LruMap;
pub use store::Store;
