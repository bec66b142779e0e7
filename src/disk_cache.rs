//! Persistent on-disk cache of object bytes keyed by (identifier, variant)
//!
//! Layout: `<base>/<xx>/<yy>/<id>.<variant>` where `xx/yy` come from an xxh3
//! hash of the key. Each file is a bincode [`EntryHeader`] followed by the
//! payload; an entry whose header or crc32 does not validate is a miss.
//!
//! Writes triggered by a request go through [`DiskCache::store`], which only
//! queues the job for a background writer task. Entries are never evicted
//! here.

use crate::error::{RelayError, Result};
use crate::models::{FileId, Variant};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

const ENTRY_MAGIC: u32 = 0x4D52_4331; // "MRC1"
const ENTRY_VERSION: u16 = 1;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Header stored in front of every cached payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct EntryHeader {
    magic: u32,
    version: u16,
    payload_len: u64,
    checksum: u32,
    stored_at: u64,
}

impl EntryHeader {
    fn for_payload(data: &[u8]) -> Self {
        EntryHeader {
            magic: ENTRY_MAGIC,
            version: ENTRY_VERSION,
            payload_len: data.len() as u64,
            checksum: crc32fast::hash(data),
            stored_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }
}

/// Background writer messages
#[derive(Debug)]
enum DiskWriteMessage {
    Write {
        id: FileId,
        variant: Variant,
        data: Bytes,
    },
    Flush(oneshot::Sender<()>),
    Shutdown,
}

#[derive(Debug, Default)]
struct DiskStatsInner {
    hits: AtomicU64,
    misses: AtomicU64,
    corrupt: AtomicU64,
    writes: AtomicU64,
    write_errors: AtomicU64,
}

/// Disk cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiskCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub corrupt: u64,
    pub writes: u64,
    pub write_errors: u64,
}

/// Durable object store for downloaded media
pub struct DiskCache {
    base_path: PathBuf,
    stats: Arc<DiskStatsInner>,
    writer_tx: mpsc::UnboundedSender<DiskWriteMessage>,
}

impl DiskCache {
    /// Open (creating if needed) a cache rooted at `base_path` and start its writer task
    ///
    /// Must be called from within a tokio runtime.
    pub async fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            RelayError::Cache(format!(
                "Failed to create cache directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        info!("Initializing disk cache at {:?}", base_path);

        let stats = Arc::new(DiskStatsInner::default());
        let (tx, rx) = mpsc::unbounded_channel();

        let writer_path = base_path.clone();
        let writer_stats = stats.clone();
        tokio::spawn(async move {
            Self::disk_writer_task(rx, writer_path, writer_stats).await;
        });

        Ok(DiskCache {
            base_path,
            stats,
            writer_tx: tx,
        })
    }

    /// Read a cached payload
    ///
    /// # Returns
    /// * `Ok(Some(Bytes))` on a valid entry
    /// * `Ok(None)` when absent or corrupt (corrupt files are removed)
    /// * `Err(RelayError::Cache)` on any other IO failure
    pub async fn get(&self, id: &FileId, variant: &Variant) -> Result<Option<Bytes>> {
        let file_path = Self::entry_path_static(&self.base_path, id, variant);

        let raw = match fs::read(&file_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                debug!("Disk cache miss: {}.{}", id, variant);
                return Ok(None);
            }
            Err(e) => {
                return Err(RelayError::Cache(format!(
                    "Failed to read {}: {}",
                    file_path.display(),
                    e
                )));
            }
        };

        match Self::decode_entry(Bytes::from(raw)) {
            Some(payload) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Disk cache hit: {}.{} ({} bytes)", id, variant, payload.len());
                Ok(Some(payload))
            }
            None => {
                warn!("Discarding corrupt disk cache entry {}", file_path.display());
                self.stats.corrupt.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                let _ = fs::remove_file(&file_path).await;
                Ok(None)
            }
        }
    }

    /// Write a payload and wait for it to land on disk
    ///
    /// Writing the same bytes twice leaves the same retrievable content.
    pub async fn put(&self, id: &FileId, variant: &Variant, data: &Bytes) -> Result<()> {
        Self::write_to_disk(&self.base_path, id, variant, data).await
    }

    /// Queue a payload for the background writer without waiting
    ///
    /// Failures are logged and counted in [`DiskCacheStats::write_errors`].
    pub fn store(&self, id: FileId, variant: Variant, data: Bytes) {
        if self
            .writer_tx
            .send(DiskWriteMessage::Write { id, variant, data })
            .is_err()
        {
            error!("Disk writer task is gone, dropping cache write");
            self.stats.write_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Wait until every write queued before this call has completed
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.writer_tx.send(DiskWriteMessage::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn entry_path(&self, id: &FileId, variant: &Variant) -> PathBuf {
        Self::entry_path_static(&self.base_path, id, variant)
    }

    pub fn get_stats(&self) -> DiskCacheStats {
        DiskCacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            corrupt: self.stats.corrupt.load(Ordering::Relaxed),
            writes: self.stats.writes.load(Ordering::Relaxed),
            write_errors: self.stats.write_errors.load(Ordering::Relaxed),
        }
    }

    async fn disk_writer_task(
        mut rx: mpsc::UnboundedReceiver<DiskWriteMessage>,
        base_path: PathBuf,
        stats: Arc<DiskStatsInner>,
    ) {
        info!("Disk writer task started");

        while let Some(msg) = rx.recv().await {
            match msg {
                DiskWriteMessage::Write { id, variant, data } => {
                    match Self::write_to_disk(&base_path, &id, &variant, &data).await {
                        Ok(()) => {
                            stats.writes.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            error!(
                                "Failed to persist {}.{} ({} bytes): {}",
                                id,
                                variant,
                                data.len(),
                                e
                            );
                            stats.write_errors.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                DiskWriteMessage::Flush(ack) => {
                    let _ = ack.send(());
                }
                DiskWriteMessage::Shutdown => {
                    info!("Disk writer task shutting down");
                    break;
                }
            }
        }
    }

    async fn write_to_disk(
        base_path: &Path,
        id: &FileId,
        variant: &Variant,
        data: &Bytes,
    ) -> Result<()> {
        let file_path = Self::entry_path_static(base_path, id, variant);
        let parent = file_path
            .parent()
            .ok_or_else(|| RelayError::Cache("Cache entry has no parent directory".to_string()))?;

        fs::create_dir_all(parent).await.map_err(|e| {
            RelayError::Cache(format!("Failed to create cache directory: {}", e))
        })?;

        let header = bincode::serialize(&EntryHeader::for_payload(data))
            .map_err(|e| RelayError::Cache(format!("Failed to encode entry header: {}", e)))?;

        // Unique temp name per writer, then rename: readers never see a torn file
        let temp_path = parent.join(format!(
            ".{}.{}.{}.tmp",
            id,
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&header).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            fs::rename(&temp_path, &file_path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(RelayError::Cache(format!(
                "Failed to write {}: {}",
                file_path.display(),
                e
            )));
        }

        debug!("Wrote to disk cache: {}.{} ({} bytes)", id, variant, data.len());
        Ok(())
    }

    fn decode_entry(raw: Bytes) -> Option<Bytes> {
        let header: EntryHeader = bincode::deserialize(&raw).ok()?;
        if header.magic != ENTRY_MAGIC || header.version != ENTRY_VERSION {
            return None;
        }

        let header_len = bincode::serialized_size(&header).ok()? as usize;
        let payload = raw.get(header_len..)?;
        if payload.len() as u64 != header.payload_len || crc32fast::hash(payload) != header.checksum
        {
            return None;
        }

        Some(raw.slice(header_len..))
    }

    fn entry_path_static(base_path: &Path, id: &FileId, variant: &Variant) -> PathBuf {
        let key = format!("{}:{}", id, variant);
        let hash = xxhash_rust::xxh3::xxh3_64(key.as_bytes());

        // 2-level directory structure: XX/YY/filename
        let dir1 = format!("{:02x}", (hash >> 8) & 0xFF);
        let dir2 = format!("{:02x}", hash & 0xFF);

        // FileId and Variant are both restricted to filename-safe characters
        base_path
            .join(dir1)
            .join(dir2)
            .join(format!("{}.{}", id, variant))
    }
}

impl Drop for DiskCache {
    fn drop(&mut self) {
        let _ = self.writer_tx.send(DiskWriteMessage::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> (FileId, Variant) {
        (FileId::parse("AgACAgIAAx0C").unwrap(), Variant::new("jpg"))
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let cache = DiskCache::new(temp_dir.path()).await.unwrap();
        let (id, variant) = key();
        let data = Bytes::from(vec![7u8; 4096]);

        assert!(cache.get(&id, &variant).await.unwrap().is_none());

        cache.put(&id, &variant, &data).await.unwrap();
        assert_eq!(cache.get(&id, &variant).await.unwrap(), Some(data));

        let stats = cache.get_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let cache = DiskCache::new(temp_dir.path()).await.unwrap();
        let (id, variant) = key();
        let data = Bytes::from_static(b"same bytes");

        cache.put(&id, &variant, &data).await.unwrap();
        cache.put(&id, &variant, &data).await.unwrap();

        assert_eq!(cache.get(&id, &variant).await.unwrap(), Some(data));
    }

    #[tokio::test]
    async fn test_variants_are_separate() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let cache = DiskCache::new(temp_dir.path()).await.unwrap();
        let (id, jpg) = key();
        let webp = Variant::new("webp");

        cache.put(&id, &jpg, &Bytes::from_static(b"jpg")).await.unwrap();

        assert!(cache.get(&id, &webp).await.unwrap().is_none());
        assert_ne!(cache.entry_path(&id, &jpg), cache.entry_path(&id, &webp));
    }

    #[tokio::test]
    async fn test_store_is_persisted_after_flush() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let cache = DiskCache::new(temp_dir.path()).await.unwrap();
        let (id, variant) = key();
        let data = Bytes::from(vec![1u8; 1000]);

        cache.store(id.clone(), variant.clone(), data.clone());
        cache.flush().await;

        assert_eq!(cache.get(&id, &variant).await.unwrap(), Some(data));
        assert_eq!(cache.get_stats().writes, 1);
    }

    #[tokio::test]
    async fn test_persistence_across_instances() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let (id, variant) = key();
        let data = Bytes::from(vec![2u8; 1000]);

        {
            let cache = DiskCache::new(temp_dir.path()).await.unwrap();
            cache.put(&id, &variant, &data).await.unwrap();
        }

        let reopened = DiskCache::new(temp_dir.path()).await.unwrap();
        assert_eq!(reopened.get(&id, &variant).await.unwrap(), Some(data));
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_miss() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let cache = DiskCache::new(temp_dir.path()).await.unwrap();
        let (id, variant) = key();

        cache
            .put(&id, &variant, &Bytes::from_static(b"original payload"))
            .await
            .unwrap();

        let path = cache.entry_path(&id, &variant);
        let mut raw = std::fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        std::fs::write(&path, raw).unwrap();

        assert!(cache.get(&id, &variant).await.unwrap().is_none());
        assert!(!path.exists());
        assert_eq!(cache.get_stats().corrupt, 1);
    }

    #[tokio::test]
    async fn test_truncated_entry_is_miss() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let cache = DiskCache::new(temp_dir.path()).await.unwrap();
        let (id, variant) = key();
        let path = cache.entry_path(&id, &variant);

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"abc").unwrap();

        assert!(cache.get(&id, &variant).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_payload_round_trips() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let cache = DiskCache::new(temp_dir.path()).await.unwrap();
        let (id, variant) = key();

        cache.put(&id, &variant, &Bytes::new()).await.unwrap();
        assert_eq!(cache.get(&id, &variant).await.unwrap(), Some(Bytes::new()));
    }

    #[test]
    fn test_decode_entry_borrows_payload() {
        let payload = b"payload-bytes";
        let mut raw = bincode::serialize(&EntryHeader::for_payload(payload)).unwrap();
        let header_len = raw.len();
        raw.extend_from_slice(payload);
        let raw = Bytes::from(raw);

        let decoded = DiskCache::decode_entry(raw.clone()).unwrap();
        assert_eq!(&decoded[..], &payload[..]);
        // Payload is a view into the read buffer
        assert_eq!(decoded.as_ptr(), raw[header_len..].as_ptr());
    }
}
