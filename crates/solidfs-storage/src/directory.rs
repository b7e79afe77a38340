//! Directory content encoding.
//!
//! A directory's content is a `u32` entry count followed by the entries in
//! byte-wise name order, each a `u16` name length, the name bytes and the
//! `u64` inode number. Lookup can therefore binary-search a decoded listing.

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::inode::InodeId;
use crate::le::LeCursor;

/// Longest name a directory entry can hold.
pub const MAX_NAME_LEN: usize = u16::MAX as usize;

/// One directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DirRecord {
    /// Entry name, never empty, never containing `/` or NUL.
    pub name: Vec<u8>,
    /// Inode the entry points at.
    pub ino: InodeId,
}

impl DirRecord {
    /// Creates an entry.
    pub fn new(name: impl Into<Vec<u8>>, ino: InodeId) -> Self {
        Self {
            name: name.into(),
            ino,
        }
    }
}

/// Anything listed in a directory, keyed by its name.
pub trait NamedEntry {
    /// The entry name.
    fn entry_name(&self) -> &[u8];
}

impl NamedEntry for DirRecord {
    fn entry_name(&self) -> &[u8] {
        &self.name
    }
}

fn check_name(name: &[u8]) -> StorageResult<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(StorageError::InvalidDirectory {
            reason: format!("entry name length {} out of range", name.len()),
        });
    }
    if name == b"." || name == b".." || name.iter().any(|&b| b == b'/' || b == 0) {
        return Err(StorageError::InvalidDirectory {
            reason: format!("invalid entry name {:?}", String::from_utf8_lossy(name)),
        });
    }
    Ok(())
}

/// Encodes a directory. Entries are sorted here; duplicate names are rejected.
pub fn encode_directory(entries: &[DirRecord]) -> StorageResult<Vec<u8>> {
    let mut sorted: Vec<&DirRecord> = entries.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut out = Vec::with_capacity(
        4 + entries.iter().map(|e| 2 + e.name.len() + 8).sum::<usize>(),
    );
    out.extend_from_slice(&(sorted.len() as u32).to_le_bytes());
    let mut prev: Option<&[u8]> = None;
    for entry in sorted {
        check_name(&entry.name)?;
        if prev == Some(entry.name.as_slice()) {
            return Err(StorageError::InvalidDirectory {
                reason: format!(
                    "duplicate entry {:?}",
                    String::from_utf8_lossy(&entry.name)
                ),
            });
        }
        out.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
        out.extend_from_slice(&entry.name);
        out.extend_from_slice(&entry.ino.to_le_bytes());
        prev = Some(entry.name.as_slice());
    }
    Ok(out)
}

/// Decodes directory content, checking order and that every inode number
/// lies in `1..=inode_count`.
pub fn decode_directory(data: &[u8], inode_count: u64) -> StorageResult<Vec<DirRecord>> {
    let mut cur = LeCursor::new(data, "directory");
    let count = cur.u32()? as usize;
    // Each entry needs at least 11 bytes; reject absurd counts before allocating.
    if count > cur.remaining() / 11 {
        return Err(StorageError::InvalidDirectory {
            reason: format!("{} entries cannot fit in {} bytes", count, data.len()),
        });
    }
    let mut entries: Vec<DirRecord> = Vec::with_capacity(count);
    for _ in 0..count {
        let name_len = cur.u16()? as usize;
        let name = cur.take(name_len)?.to_vec();
        let ino = cur.u64()?;
        check_name(&name)?;
        if ino == 0 || ino > inode_count {
            return Err(StorageError::InvalidDirectory {
                reason: format!("entry points at inode {} of {}", ino, inode_count),
            });
        }
        if let Some(last) = entries.last() {
            if last.name >= name {
                return Err(StorageError::InvalidDirectory {
                    reason: "entries are not sorted".to_string(),
                });
            }
        }
        entries.push(DirRecord { name, ino });
    }
    if cur.remaining() != 0 {
        return Err(StorageError::LengthMismatch {
            what: "directory",
            expected: cur.position() as u64,
            actual: data.len() as u64,
        });
    }
    Ok(entries)
}

/// Binary search in a decoded, sorted listing.
pub fn find_entry<'a, E: NamedEntry>(entries: &'a [E], name: &[u8]) -> Option<&'a E> {
    entries
        .binary_search_by(|e| e.entry_name().cmp(name))
        .ok()
        .map(|i| &entries[i])
}
