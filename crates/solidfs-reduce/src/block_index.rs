//! Digest → candidate locator index used to find reusable bytes.
//!
//! The index is advisory: every candidate is verified byte-for-byte before
//! reuse. Authoritative entries name an existing block number. Speculative
//! entries name raw ranges of closed fblocks that no block uses yet; they
//! are bounded and the oldest are dropped first.

use crate::fingerprint::BlockDigest;
use serde::{Deserialize, Serialize};
use solidfs_storage::{BlockNumber, DataLocator};
use std::collections::{HashMap, VecDeque};
use tracing::trace;

/// What an index entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// The range already backs this block number.
    Authoritative(BlockNumber),
    /// The range exists in an fblock but has no block number yet.
    Speculative,
}

/// One candidate for a digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Where the candidate bytes live.
    pub locator: DataLocator,
    /// Whether a block number already exists for it.
    pub kind: EntryKind,
}

/// Counters kept by the index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockIndexStats {
    /// Authoritative entries currently held.
    pub authoritative_entries: u64,
    /// Speculative entries currently held.
    pub speculative_entries: u64,
    /// Speculative entries dropped to stay under the bound.
    pub speculative_evicted: u64,
    /// Speculative entries turned into blocks.
    pub promotions: u64,
    /// Candidates that verified and were reused.
    pub hits: u64,
    /// Candidates whose digest matched but bytes did not.
    pub collisions: u64,
}

/// In-memory block index.
#[derive(Debug)]
pub struct BlockIndex {
    entries: HashMap<BlockDigest, Vec<IndexEntry>>,
    speculative_order: VecDeque<(BlockDigest, DataLocator)>,
    max_speculative: usize,
    stats: BlockIndexStats,
}

impl BlockIndex {
    /// Creates an index holding at most `max_speculative` speculative entries.
    pub fn new(max_speculative: usize) -> Self {
        Self {
            entries: HashMap::new(),
            speculative_order: VecDeque::new(),
            max_speculative,
            stats: BlockIndexStats::default(),
        }
    }

    /// Candidates for `digest`, most recently inserted first.
    pub fn lookup(&self, digest: BlockDigest) -> Vec<IndexEntry> {
        self.entries
            .get(&digest)
            .map(|list| list.iter().rev().copied().collect())
            .unwrap_or_default()
    }

    /// Records that `block` is stored at `locator`.
    pub fn insert_authoritative(
        &mut self,
        digest: BlockDigest,
        block: BlockNumber,
        locator: DataLocator,
    ) {
        let list = self.entries.entry(digest).or_default();
        if list
            .iter()
            .any(|e| e.locator == locator && e.kind == EntryKind::Authoritative(block))
        {
            return;
        }
        list.push(IndexEntry {
            locator,
            kind: EntryKind::Authoritative(block),
        });
        self.stats.authoritative_entries += 1;
    }

    /// Records a raw range that could back a future block. Never fails;
    /// the oldest speculative entries are evicted to respect the bound.
    pub fn insert_speculative(&mut self, digest: BlockDigest, locator: DataLocator) {
        if self.max_speculative == 0 {
            return;
        }
        let list = self.entries.entry(digest).or_default();
        if list.iter().any(|e| e.locator == locator) {
            return;
        }
        list.push(IndexEntry {
            locator,
            kind: EntryKind::Speculative,
        });
        self.speculative_order.push_back((digest, locator));
        self.stats.speculative_entries += 1;
        self.evict_speculative();
    }

    /// Turns the speculative entry for `locator` into an authoritative one.
    pub fn promote(&mut self, digest: BlockDigest, locator: DataLocator, block: BlockNumber) {
        let Some(list) = self.entries.get_mut(&digest) else {
            return;
        };
        if let Some(entry) = list
            .iter_mut()
            .find(|e| e.locator == locator && e.kind == EntryKind::Speculative)
        {
            entry.kind = EntryKind::Authoritative(block);
            self.stats.speculative_entries -= 1;
            self.stats.authoritative_entries += 1;
            self.stats.promotions += 1;
        }
    }

    fn evict_speculative(&mut self) {
        while self.stats.speculative_entries > self.max_speculative as u64 {
            let Some((digest, locator)) = self.speculative_order.pop_front() else {
                break;
            };
            let Some(list) = self.entries.get_mut(&digest) else {
                continue;
            };
            // Promoted entries stay in the queue; skip them here.
            if let Some(pos) = list
                .iter()
                .position(|e| e.locator == locator && e.kind == EntryKind::Speculative)
            {
                list.remove(pos);
                if list.is_empty() {
                    self.entries.remove(&digest);
                }
                self.stats.speculative_entries -= 1;
                self.stats.speculative_evicted += 1;
                trace!(%digest, fblock = locator.fblock.0, offset = locator.offset, "evicted speculative entry");
            }
        }
    }

    /// Counts a verified reuse.
    pub fn note_hit(&mut self) {
        self.stats.hits += 1;
    }

    /// Counts a digest match whose bytes differed.
    pub fn note_collision(&mut self) {
        self.stats.collisions += 1;
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> BlockIndexStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solidfs_storage::FblockId;

    fn loc(fblock: u32, offset: u32) -> DataLocator {
        DataLocator::new(FblockId(fblock), offset, 4)
    }

    #[test]
    fn lookup_is_most_recent_first() {
        let mut index = BlockIndex::new(16);
        let d = BlockDigest(1);
        index.insert_authoritative(d, BlockNumber(0), loc(0, 0));
        index.insert_speculative(d, loc(0, 8));
        index.insert_authoritative(d, BlockNumber(5), loc(1, 0));
        let found = index.lookup(d);
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].kind, EntryKind::Authoritative(BlockNumber(5)));
        assert_eq!(found[1].kind, EntryKind::Speculative);
        assert_eq!(found[2].locator, loc(0, 0));
        assert!(index.lookup(BlockDigest(2)).is_empty());
    }

    #[test]
    fn speculative_bound_evicts_oldest() {
        let mut index = BlockIndex::new(2);
        index.insert_speculative(BlockDigest(1), loc(0, 0));
        index.insert_speculative(BlockDigest(2), loc(0, 4));
        index.insert_speculative(BlockDigest(3), loc(0, 8));
        assert!(index.lookup(BlockDigest(1)).is_empty());
        assert_eq!(index.lookup(BlockDigest(3)).len(), 1);
        let stats = index.stats();
        assert_eq!(stats.speculative_entries, 2);
        assert_eq!(stats.speculative_evicted, 1);
    }

    #[test]
    fn promoted_entries_survive_eviction() {
        let mut index = BlockIndex::new(1);
        index.insert_speculative(BlockDigest(1), loc(0, 0));
        index.promote(BlockDigest(1), loc(0, 0), BlockNumber(3));
        index.insert_speculative(BlockDigest(2), loc(0, 4));
        index.insert_speculative(BlockDigest(3), loc(0, 8));

        let kept = index.lookup(BlockDigest(1));
        assert_eq!(kept[0].kind, EntryKind::Authoritative(BlockNumber(3)));
        assert!(index.lookup(BlockDigest(2)).is_empty());
        let stats = index.stats();
        assert_eq!(stats.promotions, 1);
        assert_eq!(stats.authoritative_entries, 1);
        assert_eq!(stats.speculative_entries, 1);
    }

    #[test]
    fn zero_bound_disables_speculation() {
        let mut index = BlockIndex::new(0);
        index.insert_speculative(BlockDigest(1), loc(0, 0));
        assert!(index.lookup(BlockDigest(1)).is_empty());
    }

    #[test]
    fn duplicate_inserts_are_ignored() {
        let mut index = BlockIndex::new(4);
        index.insert_authoritative(BlockDigest(1), BlockNumber(0), loc(0, 0));
        index.insert_authoritative(BlockDigest(1), BlockNumber(0), loc(0, 0));
        index.insert_speculative(BlockDigest(1), loc(0, 0));
        assert_eq!(index.lookup(BlockDigest(1)).len(), 1);
    }
}
