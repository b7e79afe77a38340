//! Build options.

use crate::compression::{CompressionAlgorithm, DEFAULT_ZSTD_LEVEL};
use crate::error::ReduceError;
use crate::fblock::{FblockStoreConfig, MIN_UNPARKED_FBLOCKS};
use serde::{Deserialize, Serialize};
use solidfs_storage::BlockNumWidth;

/// Largest block size accepted; block lengths are stored as `u32` but
/// anything near that is useless for deduplication.
pub const MAX_BLOCK_SIZE: u32 = 16 * 1024 * 1024;

/// Everything that tunes an image build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    /// Maximum length of one block.
    pub block_size: u32,
    /// Maximum raw length of one fblock.
    pub fblock_cap: u32,
    /// Fblocks scanned for overlaps per new block; 0 disables scanning.
    pub search_depth: usize,
    /// Spacing of speculative index entries in closed fblocks; 0 disables them.
    pub index_period: u32,
    /// Block-number width; `None` picks the narrowest that fits.
    pub blocknum_width: Option<BlockNumWidth>,
    /// Algorithm and effort for every stored section.
    pub compression: CompressionAlgorithm,
    /// Compression worker threads.
    pub workers: usize,
    /// Closed fblocks kept raw before parking.
    pub resident_fblocks: usize,
    /// Upper bound on raw fblock bytes held in memory. Parked fblocks live
    /// in a temporary file and do not count.
    pub memory_limit: u64,
    /// Upper bound on speculative index entries.
    pub max_speculative_entries: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            block_size: 64 * 1024,
            fblock_cap: 2 * 1024 * 1024,
            search_depth: 8,
            index_period: 4096,
            blocknum_width: None,
            compression: CompressionAlgorithm::Zstd {
                level: DEFAULT_ZSTD_LEVEL,
            },
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            resident_fblocks: 16,
            memory_limit: 1024 * 1024 * 1024,
            max_speculative_entries: 1 << 20,
        }
    }
}

impl BuildOptions {
    /// Rejects inconsistent settings.
    pub fn validate(&self) -> Result<(), ReduceError> {
        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
            return Err(ReduceError::InvalidConfig(format!(
                "block size must be 1..={}, got {}",
                MAX_BLOCK_SIZE, self.block_size
            )));
        }
        if self.fblock_cap < self.block_size {
            return Err(ReduceError::InvalidConfig(format!(
                "fblock cap {} is smaller than block size {}",
                self.fblock_cap, self.block_size
            )));
        }
        if self.workers == 0 {
            return Err(ReduceError::InvalidConfig(
                "at least one compression worker is required".to_string(),
            ));
        }
        if let CompressionAlgorithm::Zstd { level } = self.compression {
            if !(1..=22).contains(&level) {
                return Err(ReduceError::InvalidConfig(format!(
                    "zstd level must be 1..=22, got {}",
                    level
                )));
            }
        }
        let open_fblock = self.fblock_cap as u64;
        if self.memory_limit < open_fblock {
            return Err(ReduceError::InvalidConfig(format!(
                "memory limit {} cannot hold one fblock of {} bytes",
                self.memory_limit, open_fblock
            )));
        }
        Ok(())
    }

    /// Limits for the fblock store.
    pub fn store_config(&self) -> FblockStoreConfig {
        FblockStoreConfig {
            fblock_cap: self.fblock_cap,
            resident_fblocks: self.resident_fblocks,
            unparked_fblocks: self
                .search_depth
                .saturating_sub(self.resident_fblocks)
                .max(MIN_UNPARKED_FBLOCKS),
            memory_limit: self.memory_limit,
        }
    }

    /// Small settings for tests and tiny images.
    pub fn small(block_size: u32, fblock_cap: u32) -> Self {
        Self {
            block_size,
            fblock_cap,
            workers: 2,
            resident_fblocks: 4,
            memory_limit: 64 * 1024 * 1024,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        BuildOptions::default().validate().unwrap();
        BuildOptions::small(4, 16).validate().unwrap();
    }

    #[test]
    fn cap_below_block_size_rejected() {
        let opts = BuildOptions::small(64, 32);
        assert!(matches!(opts.validate(), Err(ReduceError::InvalidConfig(_))));
    }

    #[test]
    fn zero_block_size_rejected() {
        let opts = BuildOptions {
            block_size: 0,
            ..BuildOptions::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn bad_zstd_level_rejected() {
        let opts = BuildOptions {
            compression: CompressionAlgorithm::Zstd { level: 40 },
            ..BuildOptions::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn unparked_window_follows_search_depth() {
        let deep = BuildOptions {
            search_depth: 50,
            resident_fblocks: 1,
            ..BuildOptions::default()
        };
        assert_eq!(deep.store_config().unparked_fblocks, 49);
        let shallow = BuildOptions {
            search_depth: 2,
            resident_fblocks: 2,
            ..BuildOptions::default()
        };
        assert_eq!(shallow.store_config().unparked_fblocks, MIN_UNPARKED_FBLOCKS);
    }

    #[test]
    fn partial_config_uses_defaults() {
        let opts: BuildOptions = serde_json::from_str(r#"{"block_size": 4096}"#).unwrap();
        assert_eq!(opts.block_size, 4096);
        assert_eq!(opts.fblock_cap, BuildOptions::default().fblock_cap);
        assert_eq!(opts.blocknum_width, None);
    }
}
