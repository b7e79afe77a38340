use crate::attr::DirEntry;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use solidfs_storage::InodeId;
use std::num::NonZeroUsize;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirCacheConfig {
    pub capacity: usize,
}

impl Default for DirCacheConfig {
    fn default() -> Self {
        DirCacheConfig { capacity: 1_000 }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
}

/// Decoded directory listings keyed by inode. Images never change, so
/// entries only leave the cache through eviction.
pub struct DirCache {
    entries: LruCache<InodeId, Arc<Vec<DirEntry>>>,
    stats: DirCacheStats,
}

impl DirCache {
    pub fn new(config: DirCacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        DirCache {
            entries: LruCache::new(capacity),
            stats: DirCacheStats::default(),
        }
    }

    pub fn get(&mut self, ino: InodeId) -> Option<Arc<Vec<DirEntry>>> {
        match self.entries.get(&ino) {
            Some(entries) => {
                self.stats.hits += 1;
                Some(entries.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, ino: InodeId, entries: Arc<Vec<DirEntry>>) {
        if let Some((evicted, _)) = self.entries.push(ino, entries) {
            if evicted != ino {
                self.stats.evictions += 1;
            }
        }
    }

    pub fn stats(&self) -> DirCacheStats {
        DirCacheStats {
            size: self.entries.len(),
            ..self.stats.clone()
        }
    }
}

impl Default for DirCache {
    fn default() -> Self {
        Self::new(DirCacheConfig::default())
    }
}
