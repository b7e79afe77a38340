//! Public build entry points.

use crate::block_index::BlockIndexStats;
use crate::config::BuildOptions;
use crate::context::PlacementStats;
use crate::encoder::{encode_image, EncodedImage};
use crate::error::ReduceError;
use crate::fblock::FblockStoreStats;
use crate::inode_builder::TreeStats;
use crate::source::SourceTree;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;
use tracing::{info, instrument};

/// Summary of a finished build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    /// Total image length.
    pub image_len: u64,
    /// Block size used.
    pub block_size: u32,
    /// Fblock cap used.
    pub fblock_cap: u32,
    /// Selected block-number width in bytes.
    pub blocknum_width: u8,
    /// Compression algorithm name.
    pub compression: String,
    /// Inodes stored.
    pub inode_count: u64,
    /// Blocks in the block table.
    pub block_count: u64,
    /// Fblocks in the image.
    pub fblock_count: u32,
    /// Sum of regular file sizes.
    pub bytes_of_files: u64,
    /// Raw bytes in all fblocks.
    pub raw_bytes: u64,
    /// Compressed size of the fblock region.
    pub region_bytes: u64,
    /// Tree walk counters.
    pub tree: TreeStats,
    /// Block placement counters.
    pub placement: PlacementStats,
    /// Block index counters.
    pub index: BlockIndexStats,
    /// Fblock store counters.
    pub store: FblockStoreStats,
}

impl BuildReport {
    fn from_encoded<W>(encoded: &EncodedImage<W>) -> Self {
        let sb = &encoded.superblock;
        Self {
            image_len: sb.image_len,
            block_size: sb.block_size,
            fblock_cap: sb.fblock_cap,
            blocknum_width: sb.blocknum_width.bytes(),
            compression: String::new(),
            inode_count: sb.inode_count,
            block_count: sb.block_count,
            fblock_count: sb.fblock_count,
            bytes_of_files: sb.bytes_of_files,
            raw_bytes: encoded.finished.store.raw_bytes,
            region_bytes: sb.fblock_region.length,
            tree: encoded.inodes.stats.clone(),
            placement: encoded.finished.placement.clone(),
            index: encoded.finished.index.clone(),
            store: encoded.finished.store.clone(),
        }
    }

    /// `image_len / bytes_of_files`, or 0 for an image without file data.
    pub fn ratio(&self) -> f64 {
        if self.bytes_of_files == 0 {
            0.0
        } else {
            self.image_len as f64 / self.bytes_of_files as f64
        }
    }

    fn log(&self) {
        info!(
            image_len = self.image_len,
            bytes_of_files = self.bytes_of_files,
            inodes = self.inode_count,
            blocks = self.block_count,
            fblocks = self.fblock_count,
            reused = self.placement.reused,
            overlapped = self.placement.overlapped,
            collisions = self.placement.collisions,
            "build complete"
        );
    }
}

/// Builds an image of `source` at `dest`.
///
/// The image is written to a temporary file in the destination directory,
/// synced and renamed over `dest`. On any error the temporary file is
/// removed and `dest` is left untouched. Must not be called from inside a
/// tokio runtime; compression runs on a runtime owned by the build.
#[instrument(skip(source, options), fields(block_size = options.block_size))]
pub fn build(
    source: &dyn SourceTree,
    options: &BuildOptions,
    dest: &Path,
) -> Result<BuildReport, ReduceError> {
    options.validate()?;
    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let tmp = tempfile::Builder::new()
        .prefix(".solidfs-")
        .suffix(".tmp")
        .tempfile_in(dir)?;

    let encoded = encode_image(source, options, tmp.as_file())?;
    let mut report = BuildReport::from_encoded(&encoded);
    report.compression = options.compression.to_string();
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| ReduceError::Io(e.error))?;

    report.log();
    Ok(report)
}

/// Builds an image in memory.
#[instrument(skip(source, options), fields(block_size = options.block_size))]
pub fn build_to_vec(
    source: &dyn SourceTree,
    options: &BuildOptions,
) -> Result<(Vec<u8>, BuildReport), ReduceError> {
    let encoded = encode_image(source, options, Cursor::new(Vec::new()))?;
    let mut report = BuildReport::from_encoded(&encoded);
    report.compression = options.compression.to_string();
    report.log();
    Ok((encoded.out.into_inner(), report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressionAlgorithm;
    use crate::source::MemoryTree;
    use solidfs_storage::Superblock;

    fn tree() -> MemoryTree {
        let mut tree = MemoryTree::new();
        tree.add_file("docs/readme.txt", "read me please".repeat(50))
            .add_file("docs/copy.txt", "read me please".repeat(50))
            .add_file("bin/tool", vec![0x7f; 3000]);
        tree
    }

    fn options() -> BuildOptions {
        BuildOptions {
            compression: CompressionAlgorithm::Zstd { level: 3 },
            ..BuildOptions::small(256, 4096)
        }
    }

    #[test]
    fn build_writes_and_renames() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.sfs");
        let report = build(&tree(), &options(), &dest).unwrap();
        let bytes = std::fs::read(&dest).unwrap();
        assert_eq!(bytes.len() as u64, report.image_len);
        Superblock::from_bytes(&bytes).unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1);
        assert_eq!(report.bytes_of_files, 700 + 700 + 3000);
        assert!(report.ratio() < 0.5);
    }

    #[test]
    fn in_memory_build_matches_file_build() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.sfs");
        build(&tree(), &options(), &dest).unwrap();
        let (bytes, _) = build_to_vec(&tree(), &options()).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), bytes);
    }

    #[test]
    fn exhausted_memory_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.sfs");
        let mut big = MemoryTree::new();
        let noise: Vec<u8> = (0..200_000u32)
            .map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8)
            .collect();
        big.add_file("noise", noise);
        let opts = BuildOptions {
            memory_limit: 64 * 1024,
            fblock_cap: 16 * 1024,
            block_size: 1024,
            resident_fblocks: 64,
            search_depth: 0,
            ..options()
        };
        let err = build(&big, &opts, &dest).unwrap_err();
        assert!(matches!(err, ReduceError::ResourceExhausted { .. }));
        assert!(!dest.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn invalid_options_fail_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.sfs");
        let opts = BuildOptions {
            workers: 0,
            ..options()
        };
        assert!(matches!(
            build(&tree(), &opts, &dest),
            Err(ReduceError::InvalidConfig(_))
        ));
        assert!(!dest.exists());
    }
}
