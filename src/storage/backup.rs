//! Periodic snapshots of a node's store
//!
//! Binary format: `b"SCBK"`, `[u8 version]`, `[u32 count]`, then per entry
//! `[u32 key_len][key][u32 value_len][value]`, little endian. Entries run from
//! least to most recently used, so restoring them in file order rebuilds the
//! recency list.
//!
//! Each snapshot is taken under the store lock and written to a temp file that
//! is renamed over the previous one. Writes that land after a snapshot are
//! only on disk once the next snapshot runs.

use crate::BackupError;
use crate::metrics::Metrics;
use crate::storage::Store;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

const MAGIC: &[u8; 4] = b"SCBK";
const VERSION: u8 = 1;

/// Encode entries into a snapshot file body
pub fn encode_snapshot(entries: &[(String, Bytes)]) -> Bytes {
    let body: usize = entries.iter().map(|(k, v)| 8 + k.len() + v.len()).sum();
    let mut buf = BytesMut::with_capacity(9 + body);
    buf.put_slice(MAGIC);
    buf.put_u8(VERSION);
    buf.put_u32_le(entries.len() as u32);
    for (key, value) in entries {
        buf.put_u32_le(key.len() as u32);
        buf.put_slice(key.as_bytes());
        buf.put_u32_le(value.len() as u32);
        buf.put_slice(value);
    }
    buf.freeze()
}

/// Decode a snapshot file body
pub fn decode_snapshot(mut data: Bytes) -> Result<Vec<(String, Bytes)>, BackupError> {
    if data.remaining() < 9 || &data[..4] != MAGIC {
        return Err(BackupError::Corrupt("missing snapshot header".to_string()));
    }
    data.advance(4);

    let version = data.get_u8();
    if version != VERSION {
        return Err(BackupError::Corrupt(format!(
            "unsupported snapshot version {version}"
        )));
    }

    let count = data.get_u32_le() as usize;
    // Cap the preallocation; the count comes from disk.
    let mut entries = Vec::with_capacity(count.min(4096));
    for i in 0..count {
        let key = take_field(&mut data, i)?;
        let key = String::from_utf8(key.to_vec())
            .map_err(|_| BackupError::Corrupt(format!("entry {i}: key is not UTF-8")))?;
        let value = take_field(&mut data, i)?;
        entries.push((key, value));
    }

    if data.has_remaining() {
        return Err(BackupError::Corrupt(format!(
            "{} trailing bytes",
            data.remaining()
        )));
    }
    Ok(entries)
}

fn take_field(data: &mut Bytes, entry: usize) -> Result<Bytes, BackupError> {
    if data.remaining() < 4 {
        return Err(BackupError::Corrupt(format!("entry {entry}: truncated")));
    }
    let len = data.get_u32_le() as usize;
    if data.remaining() < len {
        return Err(BackupError::Corrupt(format!("entry {entry}: truncated")));
    }
    Ok(data.split_to(len))
}

/// Snapshot writer and startup loader for one node
pub struct Persister {
    path: PathBuf,
    interval: Duration,
    metrics: Arc<Metrics>,
}

impl Persister {
    pub fn new(path: PathBuf, interval: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            path,
            interval,
            metrics,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot file. `Ok(None)` when there is none.
    pub async fn load(&self) -> Result<Option<Vec<(String, Bytes)>>, BackupError> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        decode_snapshot(Bytes::from(data)).map(Some)
    }

    /// Seed `store` from the snapshot file.
    ///
    /// A missing file leaves the store empty. An unreadable or corrupt file is
    /// logged and also leaves the store empty.
    pub async fn restore_into(&self, store: &Store) -> usize {
        match self.load().await {
            Ok(Some(entries)) => {
                let loaded = store.restore(entries);
                info!(path = ?self.path, entries = loaded, "Loaded backup");
                loaded
            }
            Ok(None) => {
                debug!(path = ?self.path, "No backup found, starting empty");
                0
            }
            Err(e) => {
                self.metrics.backup_errors.inc();
                error!(path = ?self.path, "Failed to load backup, starting empty: {}", e);
                0
            }
        }
    }

    /// Write the current store contents, replacing the previous snapshot
    pub async fn persist(&self, store: &Store) -> Result<usize, BackupError> {
        let entries = store.snapshot();
        let data = encode_snapshot(&entries);

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(entries.len())
    }

    /// Snapshot `store` every interval until cancelled, then once more
    pub fn spawn(self: Arc<Self>, store: Store, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(path = ?self.path, interval = ?self.interval, "Started backup task");

            let mut ticker = tokio::time::interval_at(
                tokio::time::Instant::now() + self.interval,
                self.interval,
            );
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => self.run_once(&store).await,
                }
            }

            self.run_once(&store).await;
            info!(path = ?self.path, "Backup task stopped");
        })
    }

    async fn run_once(&self, store: &Store) {
        match self.persist(store).await {
            Ok(entries) => {
                self.metrics.backups_written.inc();
                debug!(path = ?self.path, entries, "Backed up cache");
            }
            Err(e) => {
                self.metrics.backup_errors.inc();
                error!(path = ?self.path, "Backup failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn persister(dir: &TempDir, interval: Duration) -> (Persister, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        let persister = Persister::new(dir.path().join("_bc_1270016000"), interval, Arc::clone(&metrics));
        (persister, metrics)
    }

    #[test]
    fn test_snapshot_layout() {
        let entries = vec![("A".to_string(), Bytes::from_static(b"123"))];
        let data = encode_snapshot(&entries);
        assert_eq!(
            &data[..],
            b"SCBK\x01\x01\x00\x00\x00\x01\x00\x00\x00A\x03\x00\x00\x00123"
        );
        assert_eq!(decode_snapshot(data).unwrap(), entries);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_snapshot(Bytes::from_static(b"not a backup")).is_err());
        assert!(decode_snapshot(Bytes::from_static(b"SCBK\x02\x00\x00\x00\x00")).is_err());
        // Claims one entry, holds none
        assert!(decode_snapshot(Bytes::from_static(b"SCBK\x01\x01\x00\x00\x00")).is_err());
    }

    #[tokio::test]
    async fn test_persist_and_restore() {
        let dir = TempDir::new().unwrap();
        let (persister, metrics) = persister(&dir, Duration::from_secs(60));

        let store = Store::new(10, Arc::clone(&metrics));
        store.set("A", Bytes::from_static(b"123"));
        store.set("B", Bytes::from_static(b"ANACONDA"));
        store.get("A");
        assert_eq!(persister.persist(&store).await.unwrap(), 2);

        let fresh = Store::new(10, metrics);
        assert_eq!(persister.restore_into(&fresh).await, 2);
        assert_eq!(fresh.get("A"), Some(Bytes::from_static(b"123")));
        assert_eq!(fresh.get("B"), Some(Bytes::from_static(b"ANACONDA")));
        assert_eq!(fresh.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_restore_preserves_recency() {
        let dir = TempDir::new().unwrap();
        let (persister, metrics) = persister(&dir, Duration::from_secs(60));

        let store = Store::new(2, Arc::clone(&metrics));
        store.set("a", Bytes::from_static(b"1"));
        store.set("b", Bytes::from_static(b"2"));
        store.get("a");
        persister.persist(&store).await.unwrap();

        let fresh = Store::new(2, metrics);
        persister.restore_into(&fresh).await;
        assert_eq!(fresh.set("c", Bytes::from_static(b"3")), Some("b".to_string()));
    }

    #[tokio::test]
    async fn test_missing_backup_starts_empty() {
        let dir = TempDir::new().unwrap();
        let (persister, metrics) = persister(&dir, Duration::from_secs(60));
        assert!(persister.load().await.unwrap().is_none());

        let store = Store::new(10, metrics);
        assert_eq!(persister.restore_into(&store).await, 0);
    }

    #[tokio::test]
    async fn test_corrupt_backup_starts_empty() {
        let dir = TempDir::new().unwrap();
        let (persister, metrics) = persister(&dir, Duration::from_secs(60));
        std::fs::write(persister.path(), b"garbage").unwrap();

        let store = Store::new(10, Arc::clone(&metrics));
        assert_eq!(persister.restore_into(&store).await, 0);
        assert!(store.is_empty());
        assert_eq!(metrics.backup_errors.get(), 1);
    }

    #[tokio::test]
    async fn test_periodic_backup_and_final_flush() {
        let dir = TempDir::new().unwrap();
        let (persister, metrics) = persister(&dir, Duration::from_millis(50));
        let persister = Arc::new(persister);

        let store = Store::new(10, Arc::clone(&metrics));
        store.set("A", Bytes::from_static(b"1"));

        let cancel = CancellationToken::new();
        let handle = Arc::clone(&persister).spawn(store.clone(), cancel.clone());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(metrics.backups_written.get() >= 1);
        assert_eq!(persister.load().await.unwrap().unwrap().len(), 1);

        store.set("B", Bytes::from_static(b"2"));
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(persister.load().await.unwrap().unwrap().len(), 2);
    }
}
