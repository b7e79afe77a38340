//! Mount-time decoding of the image structure.
//!
//! Everything needed to resolve a block is loaded and validated here: the
//! superblock, the extent of every fblock payload, the block table and the
//! bootstrap record of the inode table. A failure in any of them refuses
//! the mount. Fblock payloads themselves are only decompressed on demand.

use crate::error::{MountError, Result};
use crate::image::ImageSource;
use solidfs_reduce::{decompress, CompressionAlgorithm};
use solidfs_storage::{
    decode_block_table, BlockNumber, DataLocator, InodeKind, InodeRecord, StorageError,
    Superblock, INODE_HEADER_SIZE, LOCATOR_SIZE, SUPERBLOCK_SIZE,
};
use tracing::debug;

/// Position of one compressed fblock payload in the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FblockExtent {
    pub offset: u64,
    pub length: u32,
}

#[derive(Debug)]
pub struct ImageLayout {
    pub superblock: Superblock,
    pub compression: CompressionAlgorithm,
    pub fblocks: Vec<FblockExtent>,
    pub locators: Vec<DataLocator>,
    /// Record of the inode-table pseudo-inode.
    pub inode_table: InodeRecord,
}

impl ImageLayout {
    pub fn load(source: &dyn ImageSource) -> Result<Self> {
        let head = source.read_vec(0, SUPERBLOCK_SIZE.min(source.len() as usize), "superblock")?;
        let superblock = Superblock::from_bytes(&head)?;
        if superblock.image_len != source.len() {
            return Err(StorageError::LengthMismatch {
                what: "image",
                expected: superblock.image_len,
                actual: source.len(),
            }
            .into());
        }
        let compression = CompressionAlgorithm::from_code(superblock.compression).ok_or_else(|| {
            StorageError::CorruptedSuperblock {
                reason: format!("unknown compression code {}", superblock.compression),
            }
        })?;

        let fblocks = scan_region(source, &superblock)?;
        let locators = load_block_table(source, &superblock, compression)?;
        let inode_table = load_bootstrap(source, &superblock, compression)?;
        debug!(
            blocks = locators.len(),
            fblocks = fblocks.len(),
            inodes = superblock.inode_count,
            "image layout loaded"
        );
        Ok(Self {
            superblock,
            compression,
            fblocks,
            locators,
            inode_table,
        })
    }

    pub fn locator(&self, block: BlockNumber) -> Result<DataLocator> {
        self.locators
            .get(block.0 as usize)
            .copied()
            .ok_or_else(|| {
                StorageError::OffsetOutOfRange {
                    what: "block number",
                    offset: block.0,
                    length: 1,
                    limit: self.locators.len() as u64,
                }
                .into()
            })
    }

    /// Length block `index` of a `size`-byte inode must have.
    pub fn expected_block_len(&self, size: u64, index: usize) -> u32 {
        let bs = self.superblock.block_size as u64;
        (size - index as u64 * bs).min(bs) as u32
    }
}

fn scan_region(source: &dyn ImageSource, sb: &Superblock) -> Result<Vec<FblockExtent>> {
    let region = sb.fblock_region;
    let mut extents = Vec::with_capacity(sb.fblock_count as usize);
    let mut pos = region.offset;
    for id in 0..sb.fblock_count {
        let prefix = source.read_vec(pos, 4, "fblock length")?;
        let length = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
        let offset = pos + 4;
        if offset + length as u64 > region.end() {
            return Err(StorageError::OffsetOutOfRange {
                what: "fblock",
                offset,
                length: length as u64,
                limit: region.end(),
            }
            .into());
        }
        debug!(fblock = id, offset, length, "fblock extent");
        extents.push(FblockExtent { offset, length });
        pos = offset + length as u64;
    }
    if pos != region.end() {
        return Err(StorageError::LengthMismatch {
            what: "fblock region",
            expected: region.length,
            actual: pos - region.offset,
        }
        .into());
    }
    Ok(extents)
}

fn load_section(
    source: &dyn ImageSource,
    section: solidfs_storage::Section,
    what: &'static str,
    compression: CompressionAlgorithm,
    max_len: usize,
) -> Result<Vec<u8>> {
    let payload = source.read_vec(section.offset, section.length as usize, what)?;
    decompress(&payload, compression, max_len).map_err(|e| MountError::CorruptSection {
        section: what,
        reason: e.to_string(),
    })
}

fn load_block_table(
    source: &dyn ImageSource,
    sb: &Superblock,
    compression: CompressionAlgorithm,
) -> Result<Vec<DataLocator>> {
    let raw_len = sb
        .block_count
        .checked_mul(LOCATOR_SIZE as u64)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| MountError::CorruptSection {
            section: "block table",
            reason: format!("{} blocks is not addressable", sb.block_count),
        })?;
    let raw = load_section(source, sb.block_table, "block table", compression, raw_len)?;
    let locators = decode_block_table(&raw, sb.block_count)?;
    for (block, loc) in locators.iter().enumerate() {
        if loc.fblock.0 >= sb.fblock_count
            || loc.length > sb.block_size
            || loc.end() > sb.fblock_cap as u64
        {
            return Err(MountError::CorruptSection {
                section: "block table",
                reason: format!(
                    "block {} points at {} offset {} length {}",
                    block, loc.fblock, loc.offset, loc.length
                ),
            });
        }
    }
    Ok(locators)
}

fn load_bootstrap(
    source: &dyn ImageSource,
    sb: &Superblock,
    compression: CompressionAlgorithm,
) -> Result<InodeRecord> {
    let raw = load_section(
        source,
        sb.bootstrap,
        "inode table root",
        compression,
        sb.bootstrap_limit(),
    )?;
    let mut record = InodeRecord::decode_header(0, &raw)?;
    if record.kind != InodeKind::File {
        return Err(MountError::CorruptSection {
            section: "inode table root",
            reason: format!("unexpected kind {:?}", record.kind),
        });
    }
    record.decode_blocks(0, &raw[INODE_HEADER_SIZE..], sb.block_size, sb.blocknum_width)?;
    if let Some(bad) = record.blocks.iter().find(|b| b.0 >= sb.block_count) {
        return Err(MountError::CorruptSection {
            section: "inode table root",
            reason: format!("block {} beyond table of {}", bad, sb.block_count),
        });
    }
    let min_len = sb.inode_count.saturating_mul(8 + INODE_HEADER_SIZE as u64);
    if record.size < min_len {
        return Err(MountError::CorruptSection {
            section: "inode table root",
            reason: format!(
                "{} bytes cannot hold {} inodes",
                record.size, sb.inode_count
            ),
        });
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use solidfs_reduce::{build_to_vec, BuildOptions, MemoryTree};

    fn image() -> Vec<u8> {
        let mut tree = MemoryTree::new();
        tree.add_file("a", "alpha alpha alpha")
            .add_file("b/c", "gamma".repeat(40));
        let opts = BuildOptions {
            compression: CompressionAlgorithm::Lz4,
            ..BuildOptions::small(16, 64)
        };
        build_to_vec(&tree, &opts).unwrap().0
    }

    #[test]
    fn layout_matches_superblock() {
        let img = image();
        let layout = ImageLayout::load(&img).unwrap();
        assert_eq!(layout.fblocks.len(), layout.superblock.fblock_count as usize);
        assert_eq!(layout.locators.len() as u64, layout.superblock.block_count);
        assert_eq!(layout.compression, CompressionAlgorithm::Lz4);
        assert!(layout.inode_table.size >= 4 * 40);
    }

    #[test]
    fn truncated_image_is_refused() {
        let mut img = image();
        img.truncate(img.len() - 1);
        let err = ImageLayout::load(&img).unwrap_err();
        assert!(matches!(
            err,
            MountError::Storage(StorageError::LengthMismatch { what: "image", .. })
        ));
    }

    #[test]
    fn bad_fblock_length_prefix_is_refused() {
        let mut img = image();
        let pos = SUPERBLOCK_SIZE;
        img[pos..pos + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(ImageLayout::load(&img).unwrap_err().is_corruption());
    }

    #[test]
    fn garbage_block_table_is_refused() {
        let mut img = image();
        let sb = Superblock::from_bytes(&img).unwrap();
        let start = sb.block_table.offset as usize;
        for b in &mut img[start..start + 4] {
            *b = 0xFF;
        }
        let err = ImageLayout::load(&img).unwrap_err();
        assert!(matches!(
            err,
            MountError::CorruptSection {
                section: "block table",
                ..
            }
        ));
    }

    #[test]
    fn tiny_source_is_refused() {
        let img = vec![0u8; 10];
        assert!(ImageLayout::load(&img).is_err());
    }
}
