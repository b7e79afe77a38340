//! Superblock: image identification, tuning parameters and section offsets.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::le::LeCursor;
use crate::locator::BlockNumWidth;

/// Superblock magic: "SOLIDFS" followed by 0x01.
pub const SUPERBLOCK_MAGIC: u64 = u64::from_le_bytes(*b"SOLIDFS\x01");
/// Current format version.
pub const SUPERBLOCK_VERSION: u32 = 1;
/// The superblock occupies the first 128 bytes of every image.
pub const SUPERBLOCK_SIZE: usize = 128;
/// Offset of the checksum field; the checksum covers every byte before it.
const CHECKSUM_OFFSET: usize = 0x70;
/// Floor of the bootstrap record size limit for images with tiny fblocks.
pub const MIN_BOOTSTRAP_LIMIT: usize = 1024 * 1024;

/// Location of an independently compressed section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// Absolute offset in the image.
    pub offset: u64,
    /// Length in bytes as stored (compressed).
    pub length: u64,
}

impl Section {
    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }

    /// Checks that the section lies within an image of `image_len` bytes.
    pub fn check_within(&self, what: &'static str, image_len: u64) -> StorageResult<()> {
        if self.offset < SUPERBLOCK_SIZE as u64 || self.end() > image_len {
            return Err(StorageError::OffsetOutOfRange {
                what,
                offset: self.offset,
                length: self.length,
                limit: image_len,
            });
        }
        Ok(())
    }
}

/// Superblock stored at offset 0 of each image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    /// Magic number for identification.
    pub magic: u64,
    /// Version of the format.
    pub version: u32,
    /// Maximum length of one block.
    pub block_size: u32,
    /// Maximum raw length of one fblock.
    pub fblock_cap: u32,
    /// Width of block numbers in inode records.
    pub blocknum_width: BlockNumWidth,
    /// On-disk code of the compression algorithm used for every section.
    pub compression: u8,
    /// Number of entries in the block table.
    pub block_count: u64,
    /// Number of inodes (inode numbers are `1..=inode_count`).
    pub inode_count: u64,
    /// Number of fblocks in the fblock region.
    pub fblock_count: u32,
    /// Sequential region of length-prefixed compressed fblocks.
    pub fblock_region: Section,
    /// Compressed block table.
    pub block_table: Section,
    /// Compressed record of the inode-table inode.
    pub bootstrap: Section,
    /// Sum of the sizes of all regular files.
    pub bytes_of_files: u64,
    /// Total image length.
    pub image_len: u64,
}

impl Superblock {
    /// Creates a superblock with empty sections; the encoder fills them in.
    pub fn new(block_size: u32, fblock_cap: u32, compression: u8) -> Self {
        Self {
            magic: SUPERBLOCK_MAGIC,
            version: SUPERBLOCK_VERSION,
            block_size,
            fblock_cap,
            blocknum_width: BlockNumWidth::W32,
            compression,
            block_count: 0,
            inode_count: 0,
            fblock_count: 0,
            fblock_region: Section::default(),
            block_table: Section::default(),
            bootstrap: Section::default(),
            bytes_of_files: 0,
            image_len: 0,
        }
    }

    /// Serializes the superblock into its fixed 128-byte form with checksum.
    pub fn to_bytes(&self) -> [u8; SUPERBLOCK_SIZE] {
        let mut out = Vec::with_capacity(SUPERBLOCK_SIZE);
        out.extend_from_slice(&self.magic.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.block_size.to_le_bytes());
        out.extend_from_slice(&self.fblock_cap.to_le_bytes());
        out.push(self.blocknum_width.bytes());
        out.push(self.compression);
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&self.block_count.to_le_bytes());
        out.extend_from_slice(&self.inode_count.to_le_bytes());
        out.extend_from_slice(&self.fblock_count.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        for section in [self.fblock_region, self.block_table, self.bootstrap] {
            out.extend_from_slice(&section.offset.to_le_bytes());
            out.extend_from_slice(&section.length.to_le_bytes());
        }
        out.extend_from_slice(&self.bytes_of_files.to_le_bytes());
        out.extend_from_slice(&self.image_len.to_le_bytes());
        debug_assert_eq!(out.len(), CHECKSUM_OFFSET);
        let checksum = crc32fast::hash(&out);
        out.extend_from_slice(&checksum.to_le_bytes());
        out.resize(SUPERBLOCK_SIZE, 0);

        let mut bytes = [0u8; SUPERBLOCK_SIZE];
        bytes.copy_from_slice(&out);
        bytes
    }

    /// Parses and validates a superblock.
    pub fn from_bytes(data: &[u8]) -> StorageResult<Self> {
        if data.len() < SUPERBLOCK_SIZE {
            return Err(StorageError::CorruptedSuperblock {
                reason: format!(
                    "data too small: {} bytes (min {})",
                    data.len(),
                    SUPERBLOCK_SIZE
                ),
            });
        }
        let mut cur = LeCursor::new(&data[..SUPERBLOCK_SIZE], "superblock");
        let magic = cur.u64()?;
        if magic != SUPERBLOCK_MAGIC {
            debug!(
                expected = SUPERBLOCK_MAGIC,
                actual = magic,
                "invalid superblock magic"
            );
            return Err(StorageError::CorruptedSuperblock {
                reason: format!(
                    "invalid magic: expected {:#x}, got {:#x}",
                    SUPERBLOCK_MAGIC, magic
                ),
            });
        }
        let version = cur.u32()?;
        if version != SUPERBLOCK_VERSION {
            return Err(StorageError::CorruptedSuperblock {
                reason: format!(
                    "unsupported version: expected {}, got {}",
                    SUPERBLOCK_VERSION, version
                ),
            });
        }
        let block_size = cur.u32()?;
        let fblock_cap = cur.u32()?;
        let width_bytes = cur.u8()?;
        let blocknum_width = BlockNumWidth::from_bytes(width_bytes).ok_or_else(|| {
            StorageError::CorruptedSuperblock {
                reason: format!("invalid block number width: {} bytes", width_bytes),
            }
        })?;
        let compression = cur.u8()?;
        cur.u16()?;
        let block_count = cur.u64()?;
        let inode_count = cur.u64()?;
        let fblock_count = cur.u32()?;
        cur.u32()?;
        let mut sections = [Section::default(); 3];
        for section in sections.iter_mut() {
            section.offset = cur.u64()?;
            section.length = cur.u64()?;
        }
        let bytes_of_files = cur.u64()?;
        let image_len = cur.u64()?;
        let stored_checksum = cur.u32()?;

        let computed = crc32fast::hash(&data[..CHECKSUM_OFFSET]);
        if computed != stored_checksum {
            debug!(
                expected = stored_checksum,
                actual = computed,
                "superblock checksum mismatch"
            );
            return Err(StorageError::CorruptedSuperblock {
                reason: format!(
                    "checksum mismatch: expected {:#x}, got {:#x}",
                    stored_checksum, computed
                ),
            });
        }

        let sb = Self {
            magic,
            version,
            block_size,
            fblock_cap,
            blocknum_width,
            compression,
            block_count,
            inode_count,
            fblock_count,
            fblock_region: sections[0],
            block_table: sections[1],
            bootstrap: sections[2],
            bytes_of_files,
            image_len,
        };
        sb.validate_layout()?;
        Ok(sb)
    }

    /// Largest decoded size the bootstrap record may have.
    pub fn bootstrap_limit(&self) -> usize {
        (self.fblock_cap as usize).max(MIN_BOOTSTRAP_LIMIT)
    }

    /// Checks the tuning parameters and that every section lies inside the image.
    pub fn validate_layout(&self) -> StorageResult<()> {
        if self.block_size == 0 || self.fblock_cap < self.block_size {
            return Err(StorageError::CorruptedSuperblock {
                reason: format!(
                    "invalid sizes: block size {}, fblock cap {}",
                    self.block_size, self.fblock_cap
                ),
            });
        }
        if self.inode_count == 0 {
            return Err(StorageError::CorruptedSuperblock {
                reason: "image has no root inode".to_string(),
            });
        }
        if !self.blocknum_width.fits(self.block_count) {
            return Err(StorageError::CorruptedSuperblock {
                reason: format!(
                    "{} blocks do not fit {}-byte block numbers",
                    self.block_count,
                    self.blocknum_width.bytes()
                ),
            });
        }
        self.fblock_region
            .check_within("fblock region", self.image_len)?;
        self.block_table.check_within("block table", self.image_len)?;
        self.bootstrap.check_within("inode table root", self.image_len)?;
        Ok(())
    }
}
