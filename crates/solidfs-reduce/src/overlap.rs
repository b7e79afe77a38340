//! Overlap matching: finding a new block's bytes inside existing fblocks.
//!
//! A block that already appears anywhere in a recent fblock, even straddling
//! the boundary of two older blocks, costs no new bytes. When it does not,
//! the longest suffix of the open fblock that equals a prefix of the block
//! is shared and only the remainder is appended.

use crate::error::ReduceError;
use crate::fblock::FblockStore;
use solidfs_storage::DataLocator;
use tracing::trace;

/// Boyer–Moore–Horspool needle.
pub struct Horspool<'a> {
    needle: &'a [u8],
    shift: [usize; 256],
}

impl<'a> Horspool<'a> {
    /// Precomputes the bad-character table.
    pub fn new(needle: &'a [u8]) -> Self {
        let len = needle.len();
        let mut shift = [len.max(1); 256];
        if len > 0 {
            for (i, &b) in needle[..len - 1].iter().enumerate() {
                shift[b as usize] = len - 1 - i;
            }
        }
        Self { needle, shift }
    }

    /// Offset of the first occurrence in `haystack`.
    pub fn find_in(&self, haystack: &[u8]) -> Option<usize> {
        let n = self.needle.len();
        if n == 0 {
            return Some(0);
        }
        if haystack.len() < n {
            return None;
        }
        let last = self.needle[n - 1];
        let mut pos = 0;
        while pos + n <= haystack.len() {
            let tail = haystack[pos + n - 1];
            if tail == last && haystack[pos..pos + n - 1] == self.needle[..n - 1] {
                return Some(pos);
            }
            pos += self.shift[tail as usize];
        }
        None
    }
}

/// Length of the longest suffix of `buf` that equals a prefix of `block`.
pub fn tail_overlap(buf: &[u8], block: &[u8]) -> usize {
    let m = block.len();
    if m == 0 || buf.is_empty() {
        return 0;
    }
    // Prefix function of the block, then run the matcher over the tail of buf.
    let mut fail = vec![0usize; m];
    let mut k = 0;
    for i in 1..m {
        while k > 0 && block[i] != block[k] {
            k = fail[k - 1];
        }
        if block[i] == block[k] {
            k += 1;
        }
        fail[i] = k;
    }
    let start = buf.len().saturating_sub(m);
    let mut state = 0;
    for &b in &buf[start..] {
        if state == m {
            state = fail[m - 1];
        }
        while state > 0 && b != block[state] {
            state = fail[state - 1];
        }
        if b == block[state] {
            state += 1;
        }
    }
    state
}

/// Outcome of a placement search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// The bytes already exist at this locator.
    Overlap(DataLocator),
    /// Nothing found; the block must be appended.
    Append,
}

/// Decides where a block that missed the index could live without new bytes.
pub trait PlacementStrategy: Send {
    /// Searches `store` for `block`.
    fn find_placement(
        &self,
        block: &[u8],
        store: &mut FblockStore,
    ) -> Result<Placement, ReduceError>;
}

/// Scans the open fblock, then closed fblocks newest first, up to `depth`
/// fblocks in total. The first match wins.
#[derive(Debug, Clone, Copy)]
pub struct RecentFirstScan {
    /// Fblocks examined per block.
    pub depth: usize,
}

impl PlacementStrategy for RecentFirstScan {
    fn find_placement(
        &self,
        block: &[u8],
        store: &mut FblockStore,
    ) -> Result<Placement, ReduceError> {
        if self.depth == 0 || block.is_empty() {
            return Ok(Placement::Append);
        }
        let needle = Horspool::new(block);
        let mut budget = self.depth;

        if let Some((id, buf)) = store.open_view() {
            budget -= 1;
            if let Some(pos) = needle.find_in(buf) {
                trace!(fblock = id.0, offset = pos, len = block.len(), "overlap in open fblock");
                return Ok(Placement::Overlap(DataLocator::new(
                    id,
                    pos as u32,
                    block.len() as u32,
                )));
            }
        }
        let candidates: Vec<_> = store.closed_ids_desc().take(budget).collect();
        for id in candidates {
            let raw = store.closed_raw(id)?;
            if let Some(pos) = needle.find_in(&raw) {
                trace!(fblock = id.0, offset = pos, len = block.len(), "overlap in closed fblock");
                return Ok(Placement::Overlap(DataLocator::new(
                    id,
                    pos as u32,
                    block.len() as u32,
                )));
            }
        }
        Ok(Placement::Append)
    }
}

/// Never searches; every index miss is appended.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoScan;

impl PlacementStrategy for NoScan {
    fn find_placement(
        &self,
        _block: &[u8],
        _store: &mut FblockStore,
    ) -> Result<Placement, ReduceError> {
        Ok(Placement::Append)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fblock::FblockStoreConfig;
    use proptest::prelude::*;
    use solidfs_storage::FblockId;

    #[test]
    fn horspool_finds_first_occurrence() {
        let h = Horspool::new(b"abcab");
        assert_eq!(h.find_in(b"xxabcabcabyy"), Some(2));
        assert_eq!(h.find_in(b"abca"), None);
        assert_eq!(Horspool::new(b"z").find_in(b"aaz"), Some(2));
        assert_eq!(Horspool::new(b"").find_in(b"abc"), Some(0));
    }

    #[test]
    fn tail_overlap_cases() {
        assert_eq!(tail_overlap(b"hello", b"lowor"), 2);
        assert_eq!(tail_overlap(b"hello", b"xyz"), 0);
        assert_eq!(tail_overlap(b"aaaa", b"aab"), 2);
        assert_eq!(tail_overlap(b"ab", b"abcd"), 2);
        assert_eq!(tail_overlap(b"xxabcd", b"abcd"), 4);
        assert_eq!(tail_overlap(b"", b"abcd"), 0);
    }

    #[test]
    fn scan_prefers_open_then_newest() {
        let mut store = FblockStore::new(FblockStoreConfig {
            fblock_cap: 8,
            resident_fblocks: 8,
            memory_limit: 1 << 20,
            ..FblockStoreConfig::default()
        });
        store.append(b"ABCDEFGH", 0).unwrap();
        store.append(b"XXCDEFYY", 0).unwrap();
        store.append(b"QQCDEF", 0).unwrap();
        let scan = RecentFirstScan { depth: 8 };
        let found = scan.find_placement(b"CDEF", &mut store).unwrap();
        assert_eq!(
            found,
            Placement::Overlap(DataLocator::new(FblockId(2), 2, 4))
        );
        let found = scan.find_placement(b"BCDE", &mut store).unwrap();
        assert_eq!(
            found,
            Placement::Overlap(DataLocator::new(FblockId(0), 1, 4))
        );
        assert_eq!(
            NoScan.find_placement(b"CDEF", &mut store).unwrap(),
            Placement::Append
        );
    }

    #[test]
    fn scan_depth_limits_search() {
        let mut store = FblockStore::new(FblockStoreConfig {
            fblock_cap: 4,
            resident_fblocks: 8,
            memory_limit: 1 << 20,
            ..FblockStoreConfig::default()
        });
        store.append(b"AAAA", 0).unwrap();
        store.append(b"BBBB", 0).unwrap();
        store.append(b"CCCC", 0).unwrap();
        let shallow = RecentFirstScan { depth: 2 };
        assert_eq!(
            shallow.find_placement(b"AAAA", &mut store).unwrap(),
            Placement::Append
        );
        let deep = RecentFirstScan { depth: 3 };
        assert!(matches!(
            deep.find_placement(b"AAAA", &mut store).unwrap(),
            Placement::Overlap(_)
        ));
    }

    proptest! {
        #[test]
        fn prop_horspool_agrees_with_windows(
            hay in prop::collection::vec(0u8..4, 0..200),
            needle in prop::collection::vec(0u8..4, 1..6),
        ) {
            let expected = hay.windows(needle.len()).position(|w| w == needle.as_slice());
            prop_assert_eq!(Horspool::new(&needle).find_in(&hay), expected);
        }

        #[test]
        fn prop_tail_overlap_is_longest(
            buf in prop::collection::vec(0u8..3, 0..40),
            block in prop::collection::vec(0u8..3, 1..12),
        ) {
            let got = tail_overlap(&buf, &block);
            let expected = (0..=block.len().min(buf.len()))
                .rev()
                .find(|&k| buf.ends_with(&block[..k]))
                .unwrap_or(0);
            prop_assert_eq!(got, expected);
        }
    }
}
