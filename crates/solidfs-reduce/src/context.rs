//! The build context: one owner for every piece of encode-time state.
//!
//! `store_block` is the whole placement pipeline for one block: index
//! lookup with byte verification, then the placement strategy, then an
//! append to the open fblock. Closed fblocks are indexed speculatively and
//! handed to the compression pool; compressed fblocks reach the sink in id
//! order.

use crate::block_index::{BlockIndex, BlockIndexStats, EntryKind};
use crate::block_table::BlockTable;
use crate::compress_pool::{CompressedFblock, CompressionPool};
use crate::config::BuildOptions;
use crate::error::ReduceError;
use crate::fblock::{FblockStore, FblockStoreStats, SealedFblock};
use crate::fingerprint::{Blake3Hasher, ContentHasher};
use crate::overlap::{tail_overlap, NoScan, Placement, PlacementStrategy, RecentFirstScan};
use serde::{Deserialize, Serialize};
use solidfs_storage::{BlockNumber, DataLocator};
use std::io::Read;
use tracing::{debug, trace};

/// Receives compressed fblocks, lowest id first.
pub trait FblockSink {
    /// Stores one fblock.
    fn write_fblock(&mut self, fblock: CompressedFblock) -> Result<(), ReduceError>;
}

impl FblockSink for Vec<CompressedFblock> {
    fn write_fblock(&mut self, fblock: CompressedFblock) -> Result<(), ReduceError> {
        self.push(fblock);
        Ok(())
    }
}

/// Placement counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementStats {
    /// Blocks submitted.
    pub blocks_in: u64,
    /// Bytes submitted.
    pub bytes_in: u64,
    /// Blocks that reused an existing block number.
    pub reused: u64,
    /// Blocks placed on a verified speculative range.
    pub speculative_hits: u64,
    /// Blocks found by the placement strategy.
    pub overlapped: u64,
    /// Blocks that needed new raw bytes.
    pub appended: u64,
    /// Digest matches whose bytes differed.
    pub collisions: u64,
}

/// Everything the encoder owns while it runs.
pub struct BuildContext<S: FblockSink> {
    block_size: usize,
    index_period: usize,
    hasher: Box<dyn ContentHasher>,
    strategy: Box<dyn PlacementStrategy>,
    index: BlockIndex,
    store: FblockStore,
    table: BlockTable,
    pool: CompressionPool,
    sink: S,
    stats: PlacementStats,
}

/// What remains once a context is finished.
pub struct FinishedBuild<S> {
    /// The complete block table.
    pub table: BlockTable,
    /// The sink, holding every fblock.
    pub sink: S,
    /// Number of fblocks written.
    pub fblock_count: u32,
    /// Placement counters.
    pub placement: PlacementStats,
    /// Index counters.
    pub index: BlockIndexStats,
    /// Store counters.
    pub store: FblockStoreStats,
}

impl<S: FblockSink> BuildContext<S> {
    /// Creates a context for validated options.
    pub fn new(options: &BuildOptions, sink: S) -> Result<Self, ReduceError> {
        options.validate()?;
        let strategy: Box<dyn PlacementStrategy> = if options.search_depth == 0 {
            Box::new(NoScan)
        } else {
            Box::new(RecentFirstScan {
                depth: options.search_depth,
            })
        };
        Ok(Self {
            block_size: options.block_size as usize,
            index_period: options.index_period as usize,
            hasher: Box::new(Blake3Hasher),
            strategy,
            index: BlockIndex::new(options.max_speculative_entries),
            store: FblockStore::new(options.store_config()),
            table: BlockTable::new(),
            pool: CompressionPool::new(options.compression, options.workers)?,
            sink,
            stats: PlacementStats::default(),
        })
    }

    /// Replaces the content hasher.
    pub fn with_hasher(mut self, hasher: Box<dyn ContentHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    /// Replaces the placement strategy.
    pub fn with_strategy(mut self, strategy: Box<dyn PlacementStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Block size in bytes.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Blocks registered so far.
    pub fn block_count(&self) -> u64 {
        self.table.len()
    }

    /// Stores one block and returns its number.
    pub fn store_block(&mut self, data: &[u8]) -> Result<BlockNumber, ReduceError> {
        debug_assert!(!data.is_empty() && data.len() <= self.block_size);
        self.stats.blocks_in += 1;
        self.stats.bytes_in += data.len() as u64;

        let digest = self.hasher.digest(data);
        for candidate in self.index.lookup(digest) {
            if !self.store.matches(candidate.locator, data)? {
                self.index.note_collision();
                self.stats.collisions += 1;
                trace!(%digest, fblock = candidate.locator.fblock.0, "digest collision");
                continue;
            }
            self.index.note_hit();
            return Ok(match candidate.kind {
                EntryKind::Authoritative(block) => {
                    self.stats.reused += 1;
                    trace!(%digest, block = block.0, "reused block");
                    block
                }
                EntryKind::Speculative => {
                    let block = self.table.register(candidate.locator);
                    self.index.promote(digest, candidate.locator, block);
                    self.stats.speculative_hits += 1;
                    trace!(%digest, block = block.0, "speculative range promoted");
                    block
                }
            });
        }

        let locator = match self.strategy.find_placement(data, &mut self.store)? {
            Placement::Overlap(locator) => {
                self.stats.overlapped += 1;
                locator
            }
            Placement::Append => {
                let overlap = self
                    .store
                    .open_view()
                    .map(|(_, buf)| tail_overlap(buf, data))
                    .unwrap_or(0);
                let outcome = self.store.append(data, overlap)?;
                self.stats.appended += 1;
                trace!(
                    fblock = outcome.locator.fblock.0,
                    offset = outcome.locator.offset,
                    appended = outcome.appended,
                    "appended block"
                );
                if let Some(sealed) = outcome.sealed {
                    self.on_sealed(sealed)?;
                }
                outcome.locator
            }
        };
        let block = self.table.register(locator);
        self.index.insert_authoritative(digest, block, locator);
        Ok(block)
    }

    /// Splits a stream into blocks. Returns the block list and the number
    /// of bytes actually read.
    pub fn blockify(&mut self, reader: &mut dyn Read) -> Result<(Vec<BlockNumber>, u64), ReduceError> {
        let mut blocks = Vec::new();
        let mut total = 0u64;
        let mut buf = vec![0u8; self.block_size];
        loop {
            let filled = read_full(reader, &mut buf)?;
            if filled == 0 {
                break;
            }
            blocks.push(self.store_block(&buf[..filled])?);
            total += filled as u64;
            if filled < buf.len() {
                break;
            }
        }
        Ok((blocks, total))
    }

    /// Splits an in-memory buffer into blocks.
    pub fn blockify_bytes(&mut self, data: &[u8]) -> Result<Vec<BlockNumber>, ReduceError> {
        data.chunks(self.block_size)
            .map(|chunk| self.store_block(chunk))
            .collect()
    }

    fn on_sealed(&mut self, sealed: SealedFblock) -> Result<(), ReduceError> {
        let mut speculative = 0u64;
        if self.index_period > 0 && sealed.raw.len() >= self.block_size {
            let last = sealed.raw.len() - self.block_size;
            for offset in (0..=last).step_by(self.index_period) {
                let window = &sealed.raw[offset..offset + self.block_size];
                let locator = DataLocator::new(sealed.id, offset as u32, self.block_size as u32);
                self.index
                    .insert_speculative(self.hasher.digest(window), locator);
                speculative += 1;
            }
        }
        debug!(
            fblock = sealed.id.0,
            raw_len = sealed.raw.len(),
            speculative,
            "fblock submitted for compression"
        );
        for done in self.pool.submit(sealed)? {
            self.sink.write_fblock(done)?;
        }
        Ok(())
    }

    /// Closes the open fblock, drains the pool and returns the results.
    pub fn finish(mut self) -> Result<FinishedBuild<S>, ReduceError> {
        if let Some(sealed) = self.store.seal()? {
            self.on_sealed(sealed)?;
        }
        let fblock_count = self.store.fblock_count() as u32;
        for done in self.pool.finish()? {
            self.sink.write_fblock(done)?;
        }
        Ok(FinishedBuild {
            table: self.table,
            sink: self.sink,
            fblock_count,
            placement: self.stats,
            index: self.index.stats(),
            store: self.store.stats(),
        })
    }
}

fn read_full(reader: &mut dyn Read, buf: &mut [u8]) -> Result<usize, ReduceError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
