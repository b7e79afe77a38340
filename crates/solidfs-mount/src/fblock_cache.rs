//! Bounded cache of decompressed fblocks.
//!
//! A miss decompresses the whole fblock. Concurrent misses on the same
//! fblock wait for the first one to finish instead of decompressing again;
//! misses on different fblocks proceed in parallel.

use crate::error::Result;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use solidfs_storage::FblockId;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FblockCacheConfig {
    /// Decompressed fblocks kept at once.
    pub capacity: usize,
}

impl Default for FblockCacheConfig {
    fn default() -> Self {
        FblockCacheConfig { capacity: 32 }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FblockCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub decompressions: u64,
    pub size: usize,
}

struct Inner {
    entries: LruCache<u32, Arc<Vec<u8>>>,
    stats: FblockCacheStats,
}

pub struct FblockCache {
    inner: Mutex<Inner>,
    inflight: Mutex<HashMap<u32, Arc<Mutex<()>>>>,
}

impl FblockCache {
    pub fn new(config: FblockCacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        FblockCache {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                stats: FblockCacheStats::default(),
            }),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, id: FblockId) -> Option<Arc<Vec<u8>>> {
        let mut inner = self.inner.lock();
        let hit = inner.entries.get(&id.0).cloned();
        if hit.is_some() {
            inner.stats.hits += 1;
        }
        hit
    }

    /// Returns the fblock, calling `load` to decompress it on a miss.
    pub fn get_or_load<F>(&self, id: FblockId, load: F) -> Result<Arc<Vec<u8>>>
    where
        F: FnOnce() -> Result<Vec<u8>>,
    {
        if let Some(hit) = self.cached(id) {
            return Ok(hit);
        }
        let gate = self.inflight.lock().entry(id.0).or_default().clone();
        let _guard = gate.lock();
        // Another reader may have finished while we waited.
        if let Some(hit) = self.cached(id) {
            return Ok(hit);
        }

        self.inner.lock().stats.misses += 1;
        let loaded = load();
        let result = loaded.map(|raw| {
            let raw = Arc::new(raw);
            let mut inner = self.inner.lock();
            inner.stats.decompressions += 1;
            if let Some((evicted, _)) = inner.entries.push(id.0, raw.clone()) {
                if evicted != id.0 {
                    inner.stats.evictions += 1;
                    trace!(fblock = evicted, "fblock evicted");
                }
            }
            raw
        });
        self.inflight.lock().remove(&id.0);
        result
    }

    pub fn contains(&self, id: FblockId) -> bool {
        self.inner.lock().entries.contains(&id.0)
    }

    pub fn stats(&self) -> FblockCacheStats {
        let inner = self.inner.lock();
        FblockCacheStats {
            size: inner.entries.len(),
            ..inner.stats.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MountError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    fn cache(capacity: usize) -> FblockCache {
        FblockCache::new(FblockCacheConfig { capacity })
    }

    #[test]
    fn test_hit_after_miss() {
        let c = cache(4);
        let a = c.get_or_load(FblockId(0), || Ok(vec![1, 2, 3])).unwrap();
        let b = c
            .get_or_load(FblockId(0), || panic!("should be cached"))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let stats = c.stats();
        assert_eq!((stats.hits, stats.misses, stats.decompressions), (1, 1, 1));
    }

    #[test]
    fn test_capacity_plus_one_evicts_lru() {
        let c = cache(2);
        c.get_or_load(FblockId(0), || Ok(vec![0])).unwrap();
        c.get_or_load(FblockId(1), || Ok(vec![1])).unwrap();
        c.get_or_load(FblockId(0), || Ok(vec![0])).unwrap();
        c.get_or_load(FblockId(2), || Ok(vec![2])).unwrap();
        assert!(c.contains(FblockId(0)));
        assert!(!c.contains(FblockId(1)));
        assert!(c.contains(FblockId(2)));
        let stats = c.stats();
        assert_eq!(stats.size, 2);
        assert_eq!(stats.evictions, 1);
    }

    #[test]
    fn test_failed_load_is_not_cached() {
        let c = cache(2);
        let err = c
            .get_or_load(FblockId(5), || {
                Err(MountError::Decompression {
                    fblock: 5,
                    reason: "bad".into(),
                })
            })
            .unwrap_err();
        assert!(matches!(err, MountError::Decompression { fblock: 5, .. }));
        assert!(!c.contains(FblockId(5)));
        assert_eq!(c.stats().decompressions, 0);
        c.get_or_load(FblockId(5), || Ok(vec![5])).unwrap();
        assert!(c.contains(FblockId(5)));
    }

    #[test]
    fn test_concurrent_misses_decompress_once() {
        let c = Arc::new(cache(4));
        let loads = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = c.clone();
                let loads = loads.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    c.get_or_load(FblockId(7), || {
                        loads.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(50));
                        Ok(vec![7; 1024])
                    })
                    .unwrap()
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap().len(), 1024);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(c.stats().decompressions, 1);
    }
}
