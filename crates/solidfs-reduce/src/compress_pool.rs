//! Concurrent final compression of closed fblocks.
//!
//! Each closed fblock is compressed exactly once, on a tokio blocking task,
//! while matching continues on the caller's thread. Results come back in
//! fblock id order so the image region can be streamed sequentially.

use crate::compression::{compress, CompressionAlgorithm};
use crate::error::ReduceError;
use crate::fblock::SealedFblock;
use solidfs_storage::FblockId;
use std::collections::BTreeMap;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::debug;

/// One fblock in its final on-disk form.
#[derive(Debug)]
pub struct CompressedFblock {
    /// Its id.
    pub id: FblockId,
    /// Raw length before compression.
    pub raw_len: usize,
    /// Compressed payload.
    pub payload: Vec<u8>,
}

/// Bounded pool of compression workers.
///
/// Owns its runtime, so it must be driven from synchronous code.
pub struct CompressionPool {
    runtime: Runtime,
    algo: CompressionAlgorithm,
    max_in_flight: usize,
    pending: BTreeMap<u32, JoinHandle<Result<CompressedFblock, ReduceError>>>,
}

impl CompressionPool {
    /// Starts a pool with `workers` blocking threads. At most twice that many
    /// fblocks wait for compression before `submit` blocks.
    pub fn new(algo: CompressionAlgorithm, workers: usize) -> Result<Self, ReduceError> {
        let workers = workers.max(1);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(workers)
            .thread_name("solidfs-compress")
            .build()?;
        Ok(Self {
            runtime,
            algo,
            max_in_flight: workers * 2,
            pending: BTreeMap::new(),
        })
    }

    /// Queues a sealed fblock. Returns the fblocks that had to be collected
    /// to stay within the in-flight bound, lowest id first.
    pub fn submit(&mut self, sealed: SealedFblock) -> Result<Vec<CompressedFblock>, ReduceError> {
        let algo = self.algo;
        let id = sealed.id;
        let handle = self.runtime.spawn_blocking(move || {
            let payload = compress(&sealed.raw, algo)?;
            Ok(CompressedFblock {
                id: sealed.id,
                raw_len: sealed.raw.len(),
                payload,
            })
        });
        self.pending.insert(id.0, handle);

        let mut ready = Vec::new();
        while self.pending.len() > self.max_in_flight {
            ready.push(self.collect_oldest()?);
        }
        Ok(ready)
    }

    fn collect_oldest(&mut self) -> Result<CompressedFblock, ReduceError> {
        let Some((id, handle)) = self.pending.pop_first() else {
            return Err(ReduceError::CompressionFailed(
                "no fblock pending".to_string(),
            ));
        };
        let done = self
            .runtime
            .block_on(handle)
            .map_err(|e| ReduceError::CompressionFailed(format!("fblock {}: {}", id, e)))??;
        debug!(
            fblock = id,
            raw_len = done.raw_len,
            compressed_len = done.payload.len(),
            "fblock compressed"
        );
        Ok(done)
    }

    /// Waits for everything still queued, lowest id first.
    pub fn finish(mut self) -> Result<Vec<CompressedFblock>, ReduceError> {
        let mut ready = Vec::with_capacity(self.pending.len());
        while !self.pending.is_empty() {
            ready.push(self.collect_oldest()?);
        }
        Ok(ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::decompress;
    use bytes::Bytes;

    fn sealed(id: u32, fill: u8) -> SealedFblock {
        SealedFblock {
            id: FblockId(id),
            raw: Bytes::from(vec![fill; 4096]),
        }
    }

    #[test]
    fn results_come_back_in_id_order() {
        let mut pool = CompressionPool::new(CompressionAlgorithm::Zstd { level: 3 }, 2).unwrap();
        let mut out = Vec::new();
        for id in 0..10 {
            out.extend(pool.submit(sealed(id, id as u8)).unwrap());
        }
        assert!(out.len() >= 6, "in-flight bound of 4 forces early collection");
        out.extend(pool.finish().unwrap());
        let ids: Vec<u32> = out.iter().map(|c| c.id.0).collect();
        assert_eq!(ids, (0..10).collect::<Vec<_>>());
        for c in &out {
            let raw = decompress(&c.payload, CompressionAlgorithm::Zstd { level: 3 }, c.raw_len)
                .unwrap();
            assert_eq!(raw, vec![c.id.0 as u8; 4096]);
        }
    }

    #[test]
    fn empty_pool_finishes() {
        let pool = CompressionPool::new(CompressionAlgorithm::Lz4, 1).unwrap();
        assert!(pool.finish().unwrap().is_empty());
    }
}
