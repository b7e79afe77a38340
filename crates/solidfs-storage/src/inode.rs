//! Inode records and the layout of the inode table.
//!
//! The inode table is ordinary file content: an array of `u64` record
//! offsets indexed by `ino - 1`, followed by the records themselves. Its
//! own record (the bootstrap inode) is stored in a dedicated section so it
//! can be decoded before any lookup.

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::le::LeCursor;
use crate::locator::{BlockNumWidth, BlockNumber};

/// Inode number type. Inode 1 is the root directory.
pub type InodeId = u64;

/// Inode number of the root directory.
pub const ROOT_INODE: InodeId = 1;

/// Fixed header length of an inode record.
pub const INODE_HEADER_SIZE: usize = 0x20;

/// Width of one entry of the offset array at the start of the inode table.
pub const INODE_OFFSET_SIZE: usize = 8;

const S_IFMT: u32 = 0o170000;
const S_IFSOCK: u32 = 0o140000;
const S_IFLNK: u32 = 0o120000;
const S_IFREG: u32 = 0o100000;
const S_IFBLK: u32 = 0o060000;
const S_IFDIR: u32 = 0o040000;
const S_IFCHR: u32 = 0o020000;
const S_IFIFO: u32 = 0o010000;

/// File type of an inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InodeKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link; content is the target.
    Symlink,
    /// Block device.
    BlockDevice,
    /// Character device.
    CharDevice,
    /// Named pipe.
    Fifo,
    /// Unix socket.
    Socket,
}

impl InodeKind {
    /// File-type bits for `st_mode`.
    pub fn mode_bits(self) -> u32 {
        match self {
            Self::File => S_IFREG,
            Self::Directory => S_IFDIR,
            Self::Symlink => S_IFLNK,
            Self::BlockDevice => S_IFBLK,
            Self::CharDevice => S_IFCHR,
            Self::Fifo => S_IFIFO,
            Self::Socket => S_IFSOCK,
        }
    }

    /// Kind encoded in the file-type bits of `mode`.
    pub fn from_mode(mode: u32) -> Option<Self> {
        match mode & S_IFMT {
            S_IFREG => Some(Self::File),
            S_IFDIR => Some(Self::Directory),
            S_IFLNK => Some(Self::Symlink),
            S_IFBLK => Some(Self::BlockDevice),
            S_IFCHR => Some(Self::CharDevice),
            S_IFIFO => Some(Self::Fifo),
            S_IFSOCK => Some(Self::Socket),
            _ => None,
        }
    }

    /// Whether the inode carries content blocks.
    pub fn has_content(self) -> bool {
        matches!(self, Self::File | Self::Directory | Self::Symlink)
    }

    /// Whether the link-count field holds a device number instead.
    pub fn is_device(self) -> bool {
        matches!(self, Self::BlockDevice | Self::CharDevice)
    }
}

/// Decoded inode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InodeRecord {
    /// File type.
    pub kind: InodeKind,
    /// Permission bits (and setuid/setgid/sticky).
    pub perm: u32,
    /// Number of directory entries referencing this inode.
    pub nlink: u32,
    /// Device number for block/char devices, 0 otherwise.
    pub rdev: u32,
    /// Owner.
    pub uid: u32,
    /// Group.
    pub gid: u32,
    /// Modification time, seconds since the epoch.
    pub mtime: i64,
    /// Content length in bytes.
    pub size: u64,
    /// Content blocks, `ceil(size / block_size)` of them.
    pub blocks: Vec<BlockNumber>,
}

impl InodeRecord {
    /// Full `st_mode` value.
    pub fn mode(&self) -> u32 {
        self.kind.mode_bits() | (self.perm & 0o7777)
    }

    /// Encoded length for a given width.
    pub fn encoded_len(&self, width: BlockNumWidth) -> usize {
        INODE_HEADER_SIZE + self.blocks.len() * width.bytes() as usize
    }

    /// Appends the encoded record.
    pub fn encode_into(&self, out: &mut Vec<u8>, width: BlockNumWidth) -> StorageResult<()> {
        let nlink_or_rdev = if self.kind.is_device() {
            self.rdev
        } else {
            self.nlink
        };
        out.extend_from_slice(&self.mode().to_le_bytes());
        out.extend_from_slice(&nlink_or_rdev.to_le_bytes());
        out.extend_from_slice(&self.uid.to_le_bytes());
        out.extend_from_slice(&self.gid.to_le_bytes());
        out.extend_from_slice(&self.mtime.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
        for block in &self.blocks {
            width.put(out, *block)?;
        }
        Ok(())
    }

    /// Decodes the fixed header only; `blocks` is left empty.
    pub fn decode_header(ino: InodeId, data: &[u8]) -> StorageResult<Self> {
        let mut cur = LeCursor::new(data, "inode record");
        let mode = cur.u32()?;
        let kind = InodeKind::from_mode(mode).ok_or_else(|| StorageError::InvalidInode {
            ino,
            reason: format!("unknown file type in mode {:#o}", mode),
        })?;
        let nlink_or_rdev = cur.u32()?;
        let (nlink, rdev) = if kind.is_device() {
            (1, nlink_or_rdev)
        } else {
            (nlink_or_rdev, 0)
        };
        Ok(Self {
            kind,
            perm: mode & 0o7777,
            nlink,
            rdev,
            uid: cur.u32()?,
            gid: cur.u32()?,
            mtime: cur.i64()?,
            size: cur.u64()?,
            blocks: Vec::new(),
        })
    }

    /// Decodes the block list following a header already decoded into `self`.
    pub fn decode_blocks(
        &mut self,
        ino: InodeId,
        data: &[u8],
        block_size: u32,
        width: BlockNumWidth,
    ) -> StorageResult<()> {
        let count = self.block_count(block_size);
        let needed = count as u128 * width.bytes() as u128;
        if needed > data.len() as u128 {
            return Err(StorageError::InvalidInode {
                ino,
                reason: format!(
                    "block list needs {} bytes, record has {}",
                    needed,
                    data.len()
                ),
            });
        }
        let mut cur = LeCursor::new(data, "inode block list");
        self.blocks = (0..count)
            .map(|_| width.get(&mut cur))
            .collect::<StorageResult<_>>()?;
        Ok(())
    }

    /// Number of content blocks implied by `size`.
    pub fn block_count(&self, block_size: u32) -> u64 {
        if self.kind.has_content() {
            blocks_for_size(self.size, block_size)
        } else {
            0
        }
    }
}

/// `ceil(size / block_size)`.
pub fn blocks_for_size(size: u64, block_size: u32) -> u64 {
    size.div_ceil(block_size as u64)
}

/// Encodes a complete inode table for records `1..=records.len()`.
pub fn encode_inode_table(
    records: &[InodeRecord],
    width: BlockNumWidth,
) -> StorageResult<Vec<u8>> {
    let header_len = records.len() * INODE_OFFSET_SIZE;
    let body_len: usize = records.iter().map(|r| r.encoded_len(width)).sum();
    let mut offsets = Vec::with_capacity(header_len);
    let mut body = Vec::with_capacity(body_len);
    for record in records {
        let offset = (header_len + body.len()) as u64;
        offsets.extend_from_slice(&offset.to_le_bytes());
        record.encode_into(&mut body, width)?;
    }
    offsets.extend_from_slice(&body);
    Ok(offsets)
}

/// Length an inode table would have without encoding it.
pub fn inode_table_len(records: &[InodeRecord], width: BlockNumWidth) -> usize {
    records.len() * INODE_OFFSET_SIZE
        + records.iter().map(|r| r.encoded_len(width)).sum::<usize>()
}

/// Byte offset inside the inode table of the offset slot for `ino`.
pub fn offset_slot(ino: InodeId) -> u64 {
    (ino - 1) * INODE_OFFSET_SIZE as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(size: u64, blocks: Vec<u64>) -> InodeRecord {
        InodeRecord {
            kind: InodeKind::File,
            perm: 0o644,
            nlink: 1,
            rdev: 0,
            uid: 1000,
            gid: 100,
            mtime: 1_700_000_000,
            size,
            blocks: blocks.into_iter().map(BlockNumber).collect(),
        }
    }

    #[test]
    fn record_roundtrip_with_narrow_width() {
        let rec = file(10, vec![0, 1, 65_535]);
        let mut out = Vec::new();
        rec.encode_into(&mut out, BlockNumWidth::W16).unwrap();
        assert_eq!(out.len(), INODE_HEADER_SIZE + 6);

        let mut decoded = InodeRecord::decode_header(2, &out).unwrap();
        decoded
            .decode_blocks(2, &out[INODE_HEADER_SIZE..], 4, BlockNumWidth::W16)
            .unwrap();
        assert_eq!(decoded, rec);
        assert_eq!(decoded.mode(), 0o100644);
    }

    #[test]
    fn device_stores_rdev_in_link_field() {
        let rec = InodeRecord {
            kind: InodeKind::CharDevice,
            perm: 0o600,
            nlink: 1,
            rdev: 0x0501,
            uid: 0,
            gid: 0,
            mtime: 0,
            size: 0,
            blocks: Vec::new(),
        };
        let mut out = Vec::new();
        rec.encode_into(&mut out, BlockNumWidth::W32).unwrap();
        let decoded = InodeRecord::decode_header(3, &out).unwrap();
        assert_eq!(decoded.rdev, 0x0501);
        assert_eq!(decoded.nlink, 1);
        assert_eq!(decoded.block_count(4096), 0);
    }

    #[test]
    fn truncated_block_list_is_invalid() {
        let rec = file(9, vec![0, 1, 2]);
        let mut out = Vec::new();
        rec.encode_into(&mut out, BlockNumWidth::W32).unwrap();
        let mut decoded = InodeRecord::decode_header(5, &out).unwrap();
        let err = decoded
            .decode_blocks(5, &out[INODE_HEADER_SIZE..out.len() - 1], 4, BlockNumWidth::W32)
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidInode { ino: 5, .. }));
    }

    #[test]
    fn unknown_mode_is_invalid() {
        let mut out = vec![0u8; INODE_HEADER_SIZE];
        out[..4].copy_from_slice(&0o644u32.to_le_bytes());
        assert!(InodeRecord::decode_header(1, &out).is_err());
    }

    #[test]
    fn inode_table_offsets_point_at_records() {
        let records = vec![file(0, vec![]), file(8, vec![3, 4])];
        let table = encode_inode_table(&records, BlockNumWidth::W24).unwrap();
        assert_eq!(table.len(), inode_table_len(&records, BlockNumWidth::W24));

        let mut cur = LeCursor::new(&table, "test");
        let first = cur.u64().unwrap() as usize;
        let second = cur.u64().unwrap() as usize;
        assert_eq!(first, 16);
        assert_eq!(second, 16 + INODE_HEADER_SIZE);
        let rec = InodeRecord::decode_header(2, &table[second..]).unwrap();
        assert_eq!(rec.size, 8);
        assert_eq!(offset_slot(2), 8);
    }

    #[test]
    fn blocks_for_size_rounds_up() {
        assert_eq!(blocks_for_size(0, 4), 0);
        assert_eq!(blocks_for_size(4, 4), 1);
        assert_eq!(blocks_for_size(5, 4), 2);
    }
}
