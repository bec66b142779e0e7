//! Short-lived in-memory cache of identifier → origin path
//!
//! Entries expire after a fixed TTL and are dropped lazily on lookup or by
//! a periodic [`MetadataCache::purge_expired`] sweep. There is no explicit
//! invalidation: a stale path may be served until its entry expires.

use crate::models::{FileId, ResolvedPath};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::debug;

/// Longest TTL an entry may carry
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 3600);

/// A full cache evicts `max_entries / EVICTION_BATCH_DIVISOR` entries at once
const EVICTION_BATCH_DIVISOR: usize = 64;

#[derive(Clone)]
struct MetadataEntry {
    path: ResolvedPath,
    expires_at: Instant,
}

/// Metadata cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetadataCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub evicted: u64,
}

/// TTL map from file identifier to resolved origin path
pub struct MetadataCache {
    storage: RwLock<HashMap<FileId, MetadataEntry>>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    evicted: AtomicU64,
}

impl MetadataCache {
    /// Create a cache holding at most `max_entries` paths
    pub fn new(max_entries: usize) -> Self {
        MetadataCache {
            storage: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Look up the resolved path for an identifier
    ///
    /// Returns `None` on a miss, including when the entry's TTL has elapsed;
    /// the caller is then responsible for re-resolving against the origin.
    pub fn lookup(&self, id: &FileId) -> Option<ResolvedPath> {
        let now = Instant::now();

        {
            let storage = self.storage.read().unwrap_or_else(|e| e.into_inner());
            match storage.get(id) {
                Some(entry) if entry.expires_at > now => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!("Metadata cache hit: {} -> {}", id, entry.path);
                    return Some(entry.path.clone());
                }
                Some(_) => {}
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    debug!("Metadata cache miss: {}", id);
                    return None;
                }
            }
        }

        // Expired: drop it, unless a concurrent insert already refreshed it
        let mut storage = self.storage.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = storage.get(id) {
            if entry.expires_at > now {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.path.clone());
            }
            storage.remove(id);
            self.expired.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!("Metadata cache entry expired: {}", id);
        None
    }

    /// Insert or refresh the path for an identifier
    ///
    /// TTLs longer than [`MAX_TTL`] are clamped. When the cache is full,
    /// expired entries are swept first; if that frees nothing, a batch of
    /// the entries closest to expiry is evicted so the next inserts find room.
    pub fn insert(&self, id: FileId, path: ResolvedPath, ttl: Duration) {
        let now = Instant::now();
        let expires_at = now.checked_add(ttl.min(MAX_TTL)).unwrap_or(now);
        let mut storage = self.storage.write().unwrap_or_else(|e| e.into_inner());

        if !storage.contains_key(&id) && storage.len() >= self.max_entries {
            let before = storage.len();
            storage.retain(|_, entry| entry.expires_at > now);
            let dropped = (before - storage.len()) as u64;
            self.expired.fetch_add(dropped, Ordering::Relaxed);

            if storage.len() >= self.max_entries {
                let batch = (self.max_entries / EVICTION_BATCH_DIVISOR).max(1);
                let mut candidates: Vec<(Instant, FileId)> = storage
                    .iter()
                    .map(|(k, entry)| (entry.expires_at, k.clone()))
                    .collect();
                candidates.select_nth_unstable_by_key(batch - 1, |(at, _)| *at);

                for (_, victim) in candidates.into_iter().take(batch) {
                    storage.remove(&victim);
                    debug!("Evicted metadata entry closest to expiry: {}", victim);
                }
                self.evicted.fetch_add(batch as u64, Ordering::Relaxed);
            }
        }

        debug!("Metadata cached: {} -> {} (ttl {:?})", id, path, ttl);
        storage.insert(id, MetadataEntry { path, expires_at });
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut storage = self.storage.write().unwrap_or_else(|e| e.into_inner());
        let before = storage.len();
        storage.retain(|_, entry| entry.expires_at > now);
        let removed = before - storage.len();
        self.expired.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn len(&self) -> usize {
        self.storage.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_stats(&self) -> MetadataCacheStats {
        MetadataCacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }
}
