//! Fblock store: the open append-only fblock plus every closed one.
//!
//! Closed fblocks keep their raw bytes available for verification and
//! overlap scanning. The most recent `resident_fblocks` stay raw in memory;
//! older ones are parked as LZ4 in a temporary spool file and expanded on
//! demand into a small LRU. Parking never changes what ends up in the
//! image, and parked fblocks do not count against the memory limit.

use crate::compression::{compress, decompress, CompressionAlgorithm};
use crate::error::ReduceError;
use bytes::Bytes;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use solidfs_storage::{DataLocator, FblockId};
use std::fs::File;
use std::num::NonZeroUsize;
use std::os::unix::fs::FileExt;
use tracing::debug;

/// Fewest parked fblocks expanded at the same time.
pub const MIN_UNPARKED_FBLOCKS: usize = 4;

/// Limits for the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FblockStoreConfig {
    /// Maximum raw length of one fblock.
    pub fblock_cap: u32,
    /// Closed fblocks kept raw; older ones are parked.
    pub resident_fblocks: usize,
    /// Parked fblocks kept expanded after a lookup.
    pub unparked_fblocks: usize,
    /// Upper bound on raw bytes held in memory: the open fblock, resident
    /// fblocks and expanded parked ones.
    pub memory_limit: u64,
}

impl Default for FblockStoreConfig {
    fn default() -> Self {
        Self {
            fblock_cap: 2 * 1024 * 1024,
            resident_fblocks: 16,
            unparked_fblocks: MIN_UNPARKED_FBLOCKS,
            memory_limit: 1024 * 1024 * 1024,
        }
    }
}

/// A just-closed fblock, handed on for final compression.
#[derive(Debug, Clone)]
pub struct SealedFblock {
    /// Its id.
    pub id: FblockId,
    /// Complete raw content.
    pub raw: Bytes,
}

/// Result of an append.
#[derive(Debug)]
pub struct AppendOutcome {
    /// Where the block's bytes now live.
    pub locator: DataLocator,
    /// New raw bytes written.
    pub appended: usize,
    /// The previously open fblock, if the append had to close it.
    pub sealed: Option<SealedFblock>,
}

#[derive(Debug)]
enum Residency {
    Resident(Bytes),
    /// LZ4 payload at `offset` in the spool file.
    Parked { offset: u64, len: usize },
}

#[derive(Debug)]
struct ClosedFblock {
    raw_len: usize,
    residency: Residency,
}

/// Counters kept by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FblockStoreStats {
    /// Fblocks opened so far.
    pub opened: u64,
    /// Fblocks closed so far.
    pub closed: u64,
    /// Total raw bytes written.
    pub raw_bytes: u64,
    /// Bytes saved by appending only the non-overlapping tail.
    pub tail_overlap_bytes: u64,
    /// Fblocks parked.
    pub parked: u64,
    /// Bytes written to the spool file.
    pub spooled_bytes: u64,
    /// Times a parked fblock had to be expanded.
    pub unparked: u64,
    /// Highest memory use seen.
    pub peak_memory: u64,
}

/// Holds the raw content of every fblock while a build runs.
pub struct FblockStore {
    config: FblockStoreConfig,
    open: Option<(FblockId, Vec<u8>)>,
    closed: Vec<ClosedFblock>,
    spool: Option<File>,
    spool_len: u64,
    unparked: LruCache<u32, Bytes>,
    unparked_bytes: u64,
    /// Raw bytes of the open and resident fblocks.
    memory_used: u64,
    stats: FblockStoreStats,
}

impl FblockStore {
    /// Creates an empty store. The spool file is created on first park.
    pub fn new(config: FblockStoreConfig) -> Self {
        let capacity = NonZeroUsize::new(config.unparked_fblocks).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            open: None,
            closed: Vec::new(),
            spool: None,
            spool_len: 0,
            unparked: LruCache::new(capacity),
            unparked_bytes: 0,
            memory_used: 0,
            stats: FblockStoreStats::default(),
        }
    }

    /// The open fblock and its bytes so far.
    pub fn open_view(&self) -> Option<(FblockId, &[u8])> {
        self.open.as_ref().map(|(id, buf)| (*id, buf.as_slice()))
    }

    /// Number of fblocks created, including the open one.
    pub fn fblock_count(&self) -> usize {
        self.closed.len() + usize::from(self.open.is_some())
    }

    /// Ids of closed fblocks, newest first.
    pub fn closed_ids_desc(&self) -> impl Iterator<Item = FblockId> + '_ {
        (0..self.closed.len() as u32).rev().map(FblockId)
    }

    /// Appends `block`, reusing the last `overlap` bytes of the open fblock
    /// when they equal the block's first `overlap` bytes. Opens a new fblock
    /// when the rest would not fit; the overlap is dropped in that case.
    pub fn append(&mut self, block: &[u8], overlap: usize) -> Result<AppendOutcome, ReduceError> {
        let cap = self.config.fblock_cap as usize;
        if block.len() > cap {
            return Err(ReduceError::InvalidConfig(format!(
                "block of {} bytes exceeds fblock cap {}",
                block.len(),
                cap
            )));
        }
        let fits = match &self.open {
            Some((_, buf)) => {
                debug_assert!(overlap <= buf.len() && overlap <= block.len());
                buf.len() + (block.len() - overlap) <= cap
            }
            None => false,
        };
        let (sealed, overlap) = if fits {
            (None, overlap)
        } else {
            let sealed = self.seal()?;
            let id = FblockId(self.closed.len() as u32);
            self.open = Some((id, Vec::with_capacity(cap.min(1 << 20))));
            self.stats.opened += 1;
            (sealed, 0)
        };

        let Some((id, buf)) = self.open.as_mut() else {
            unreachable!("an fblock was opened above");
        };
        let offset = buf.len() - overlap;
        buf.extend_from_slice(&block[overlap..]);
        let appended = block.len() - overlap;
        let locator = DataLocator::new(*id, offset as u32, block.len() as u32);

        self.stats.raw_bytes += appended as u64;
        self.stats.tail_overlap_bytes += overlap as u64;
        self.memory_used += appended as u64;
        self.check_memory()?;
        Ok(AppendOutcome {
            locator,
            appended,
            sealed,
        })
    }

    /// Closes the open fblock, if any.
    pub fn seal(&mut self) -> Result<Option<SealedFblock>, ReduceError> {
        let Some((id, buf)) = self.open.take() else {
            return Ok(None);
        };
        let raw = Bytes::from(buf);
        debug!(fblock = id.0, raw_len = raw.len(), "fblock closed");
        self.closed.push(ClosedFblock {
            raw_len: raw.len(),
            residency: Residency::Resident(raw.clone()),
        });
        self.stats.closed += 1;
        self.park_idle()?;
        self.check_memory()?;
        Ok(Some(SealedFblock { id, raw }))
    }

    fn park_idle(&mut self) -> Result<(), ReduceError> {
        let keep = self.config.resident_fblocks;
        let Some(first_resident) = self.closed.len().checked_sub(keep) else {
            return Ok(());
        };
        for idx in (0..first_resident).rev() {
            let Residency::Resident(raw) = &self.closed[idx].residency else {
                // Everything older was parked on an earlier pass.
                break;
            };
            let raw_len = raw.len();
            let parked = compress(raw, CompressionAlgorithm::Lz4)?;
            let offset = self.spool_len;
            if self.spool.is_none() {
                self.spool = Some(tempfile::tempfile()?);
            }
            if let Some(spool) = &self.spool {
                spool.write_all_at(&parked, offset)?;
            }
            self.spool_len += parked.len() as u64;
            self.memory_used -= raw_len as u64;
            self.stats.parked += 1;
            self.stats.spooled_bytes += parked.len() as u64;
            debug!(fblock = idx, raw_len, parked_len = parked.len(), "fblock parked");
            self.closed[idx].residency = Residency::Parked {
                offset,
                len: parked.len(),
            };
        }
        Ok(())
    }

    /// Raw content of a closed fblock.
    pub fn closed_raw(&mut self, id: FblockId) -> Result<Bytes, ReduceError> {
        let fblock = self.closed.get(id.0 as usize).ok_or_else(|| {
            ReduceError::InvalidConfig(format!("{} is not a closed fblock", id))
        })?;
        let (offset, len) = match &fblock.residency {
            Residency::Resident(raw) => return Ok(raw.clone()),
            Residency::Parked { offset, len } => (*offset, *len),
        };
        let raw_len = fblock.raw_len;
        if let Some(raw) = self.unparked.get(&id.0) {
            return Ok(raw.clone());
        }
        let spool = self.spool.as_ref().ok_or_else(|| {
            ReduceError::InvalidConfig(format!("{} is parked but nothing was spooled", id))
        })?;
        let mut parked = vec![0u8; len];
        spool.read_exact_at(&mut parked, offset)?;
        let raw = Bytes::from(decompress(&parked, CompressionAlgorithm::Lz4, raw_len)?);
        self.stats.unparked += 1;
        self.keep_unparked(id, raw.clone());
        Ok(raw)
    }

    /// Caches an expanded fblock, dropping the least recently used ones
    /// while the store is over its memory limit.
    fn keep_unparked(&mut self, id: FblockId, raw: Bytes) {
        self.unparked_bytes += raw.len() as u64;
        if let Some((_, old)) = self.unparked.push(id.0, raw) {
            self.unparked_bytes -= old.len() as u64;
        }
        while self.memory_used + self.unparked_bytes > self.config.memory_limit
            && self.unparked.len() > 1
        {
            if let Some((_, old)) = self.unparked.pop_lru() {
                self.unparked_bytes -= old.len() as u64;
            }
        }
        let in_use = self.memory_used + self.unparked_bytes;
        self.stats.peak_memory = self.stats.peak_memory.max(in_use);
    }

    /// True when the bytes at `locator` equal `data`.
    pub fn matches(&mut self, locator: DataLocator, data: &[u8]) -> Result<bool, ReduceError> {
        if locator.length as usize != data.len() {
            return Ok(false);
        }
        let range = locator.offset as usize..locator.end() as usize;
        if let Some((id, buf)) = &self.open {
            if *id == locator.fblock {
                return Ok(buf.get(range).is_some_and(|b| b == data));
            }
        }
        let raw = self.closed_raw(locator.fblock)?;
        Ok(raw.get(range).is_some_and(|b| b == data))
    }

    fn check_memory(&mut self) -> Result<(), ReduceError> {
        let in_use = self.memory_used + self.unparked_bytes;
        self.stats.peak_memory = self.stats.peak_memory.max(in_use);
        if in_use > self.config.memory_limit {
            return Err(ReduceError::ResourceExhausted {
                resource: "fblock memory",
                limit: self.config.memory_limit,
                requested: in_use,
            });
        }
        Ok(())
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> FblockStoreStats {
        self.stats.clone()
    }
}
