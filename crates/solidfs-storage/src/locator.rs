//! Block numbers, fblock ids and the data locators that bind them together.

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::le::{put_uint_n, LeCursor};

/// Size of one encoded [`DataLocator`] in the block table.
pub const LOCATOR_SIZE: usize = 12;

/// Dense, 0-based index into the block table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockNumber(pub u64);

impl std::fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of a solid container, assigned in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FblockId(pub u32);

impl std::fmt::Display for FblockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fblock {}", self.0)
    }
}

/// Where a block's bytes live: `length` bytes at `offset` of the raw
/// (decompressed) content of `fblock`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataLocator {
    /// Container holding the bytes.
    pub fblock: FblockId,
    /// Byte offset inside the decompressed fblock.
    pub offset: u32,
    /// Number of bytes.
    pub length: u32,
}

impl DataLocator {
    /// Creates a locator.
    pub fn new(fblock: FblockId, offset: u32, length: u32) -> Self {
        Self {
            fblock,
            offset,
            length,
        }
    }

    /// Exclusive end offset inside the fblock.
    pub fn end(&self) -> u64 {
        self.offset as u64 + self.length as u64
    }

    /// Checks that the range lies within an fblock of `fblock_len` raw bytes.
    pub fn check_within(&self, fblock_len: usize) -> StorageResult<()> {
        if self.end() > fblock_len as u64 {
            return Err(StorageError::OffsetOutOfRange {
                what: "data locator",
                offset: self.offset as u64,
                length: self.length as u64,
                limit: fblock_len as u64,
            });
        }
        Ok(())
    }

    /// Appends the fixed-width encoding.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.fblock.0.to_le_bytes());
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.length.to_le_bytes());
    }

    /// Decodes one locator from the cursor.
    pub fn decode(cur: &mut LeCursor<'_>) -> StorageResult<Self> {
        Ok(Self {
            fblock: FblockId(cur.u32()?),
            offset: cur.u32()?,
            length: cur.u32()?,
        })
    }
}

/// Encodes the block table: one locator per block number, in order.
pub fn encode_block_table(locators: &[DataLocator]) -> Vec<u8> {
    let mut out = Vec::with_capacity(locators.len() * LOCATOR_SIZE);
    for locator in locators {
        locator.encode_into(&mut out);
    }
    out
}

/// Decodes a block table holding exactly `count` locators.
pub fn decode_block_table(raw: &[u8], count: u64) -> StorageResult<Vec<DataLocator>> {
    let expected = count.saturating_mul(LOCATOR_SIZE as u64);
    if raw.len() as u64 != expected {
        return Err(StorageError::LengthMismatch {
            what: "block table",
            expected,
            actual: raw.len() as u64,
        });
    }
    let mut cur = LeCursor::new(raw, "block table");
    (0..count).map(|_| DataLocator::decode(&mut cur)).collect()
}

/// On-disk width of block numbers inside inode records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BlockNumWidth {
    /// 2 bytes, up to 65 536 blocks.
    W16,
    /// 3 bytes, up to 16 777 216 blocks.
    W24,
    /// 4 bytes.
    W32,
    /// 8 bytes.
    W64,
}

impl BlockNumWidth {
    /// All widths, narrowest first.
    pub const ALL: [BlockNumWidth; 4] = [Self::W16, Self::W24, Self::W32, Self::W64];

    /// Bytes per block number.
    pub fn bytes(self) -> u8 {
        match self {
            Self::W16 => 2,
            Self::W24 => 3,
            Self::W32 => 4,
            Self::W64 => 8,
        }
    }

    /// Parses the byte count stored in the superblock.
    pub fn from_bytes(bytes: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|w| w.bytes() == bytes)
    }

    /// Number of distinct block numbers the width can express.
    pub fn capacity(self) -> u128 {
        1u128 << (self.bytes() as u32 * 8)
    }

    /// True if a table of `block_count` blocks can be addressed.
    pub fn fits(self, block_count: u64) -> bool {
        (block_count as u128) <= self.capacity()
    }

    /// Narrowest width addressing `block_count` blocks.
    pub fn smallest_for(block_count: u64) -> Self {
        Self::ALL
            .into_iter()
            .find(|w| w.fits(block_count))
            .unwrap_or(Self::W64)
    }

    /// Appends a block number, failing if it does not fit.
    pub fn put(self, out: &mut Vec<u8>, block: BlockNumber) -> StorageResult<()> {
        if (block.0 as u128) >= self.capacity() {
            return Err(StorageError::BlockNumberOverflow {
                block: block.0,
                width_bytes: self.bytes(),
            });
        }
        put_uint_n(out, block.0, self.bytes() as usize);
        Ok(())
    }

    /// Reads one block number.
    pub fn get(self, cur: &mut LeCursor<'_>) -> StorageResult<BlockNumber> {
        cur.uint_n(self.bytes() as usize).map(BlockNumber)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smallest_width_boundaries() {
        assert_eq!(BlockNumWidth::smallest_for(0), BlockNumWidth::W16);
        assert_eq!(BlockNumWidth::smallest_for(65_536), BlockNumWidth::W16);
        assert_eq!(BlockNumWidth::smallest_for(65_537), BlockNumWidth::W24);
        assert_eq!(BlockNumWidth::smallest_for(1 << 24), BlockNumWidth::W24);
        assert_eq!(BlockNumWidth::smallest_for((1 << 24) + 1), BlockNumWidth::W32);
        assert_eq!(BlockNumWidth::smallest_for(u64::MAX), BlockNumWidth::W64);
    }

    #[test]
    fn width_rejects_large_numbers() {
        let mut out = Vec::new();
        assert!(BlockNumWidth::W16.put(&mut out, BlockNumber(65_535)).is_ok());
        let err = BlockNumWidth::W16
            .put(&mut out, BlockNumber(65_536))
            .unwrap_err();
        assert!(matches!(err, StorageError::BlockNumberOverflow { width_bytes: 2, .. }));
    }

    #[test]
    fn width_codes_roundtrip() {
        for w in BlockNumWidth::ALL {
            assert_eq!(BlockNumWidth::from_bytes(w.bytes()), Some(w));
        }
        assert_eq!(BlockNumWidth::from_bytes(5), None);
    }

    #[test]
    fn block_table_length_is_checked() {
        let locators = vec![
            DataLocator::new(FblockId(0), 0, 4),
            DataLocator::new(FblockId(0), 4, 4),
        ];
        let raw = encode_block_table(&locators);
        assert_eq!(raw.len(), 2 * LOCATOR_SIZE);
        assert_eq!(decode_block_table(&raw, 2).unwrap(), locators);
        assert!(matches!(
            decode_block_table(&raw, 3),
            Err(StorageError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn locator_within_bounds() {
        let loc = DataLocator::new(FblockId(1), 10, 6);
        assert!(loc.check_within(16).is_ok());
        assert!(loc.check_within(15).is_err());
    }
}
