//! Turns a source tree into inode records.
//!
//! Directories are visited in name order so inode and block numbering is
//! deterministic. A directory's inode number is reserved when it is
//! reached; its content is encoded after every child has a number.
//! Non-directory inodes are shared between entries whose content and
//! attributes are identical, and between hard links; `nlink` counts the
//! entries that reference each one.

use crate::context::{BuildContext, FblockSink};
use crate::error::ReduceError;
use crate::source::{LinkKey, SourceAttrs, SourceEntry, SourceKind, SourceTree};
use serde::{Deserialize, Serialize};
use solidfs_storage::{encode_directory, DirRecord, InodeId, InodeKind, InodeRecord};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use tracing::{debug, warn};

/// Counters for the tree walk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeStats {
    /// Directories stored.
    pub directories: u64,
    /// Regular file entries seen, hard links included.
    pub files: u64,
    /// Symbolic links seen.
    pub symlinks: u64,
    /// Devices, FIFOs and sockets seen.
    pub special: u64,
    /// Entries that reused an identical inode.
    pub inodes_shared: u64,
    /// Entries that were hard links to an earlier entry.
    pub hardlinks: u64,
    /// Sum of regular file sizes, hard links counted once.
    pub bytes_of_files: u64,
}

/// Every inode of the tree, inode `n` at index `n - 1`.
#[derive(Debug, Clone)]
pub struct InodeList {
    /// Records in inode-number order.
    pub records: Vec<InodeRecord>,
    /// Walk counters.
    pub stats: TreeStats,
}

/// Builds inode records while blockifying content through a context.
#[derive(Default)]
pub struct InodeBuilder {
    records: Vec<InodeRecord>,
    shared: HashMap<InodeRecord, InodeId>,
    links: HashMap<LinkKey, InodeId>,
    stats: TreeStats,
}

fn record(kind: InodeKind, attrs: &SourceAttrs) -> InodeRecord {
    InodeRecord {
        kind,
        perm: attrs.perm & 0o7777,
        nlink: 0,
        rdev: 0,
        uid: attrs.uid,
        gid: attrs.gid,
        mtime: attrs.mtime,
        size: 0,
        blocks: Vec::new(),
    }
}

impl InodeBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Walks the whole tree. The root directory becomes inode 1.
    pub fn build<S: FblockSink>(
        mut self,
        ctx: &mut BuildContext<S>,
        source: &dyn SourceTree,
    ) -> Result<InodeList, ReduceError> {
        let root_attrs = source.root_attrs()?;
        let root = self.reserve(InodeKind::Directory, &root_attrs);
        self.build_dir(ctx, source, Path::new(""), root, &root_attrs)?;
        debug!(
            inodes = self.records.len(),
            files = self.stats.files,
            directories = self.stats.directories,
            "inode tree complete"
        );
        Ok(InodeList {
            records: self.records,
            stats: self.stats,
        })
    }

    fn reserve(&mut self, kind: InodeKind, attrs: &SourceAttrs) -> InodeId {
        self.records.push(record(kind, attrs));
        self.records.len() as InodeId
    }

    fn build_dir<S: FblockSink>(
        &mut self,
        ctx: &mut BuildContext<S>,
        source: &dyn SourceTree,
        path: &Path,
        ino: InodeId,
        attrs: &SourceAttrs,
    ) -> Result<(), ReduceError> {
        let mut entries = source.list(path)?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let mut dirents = Vec::with_capacity(entries.len());
        let mut subdirs = 0u32;
        for entry in &entries {
            let child_path = path.join(OsStr::from_bytes(&entry.name));
            let child = if entry.kind == SourceKind::Directory {
                subdirs += 1;
                let child = self.reserve(InodeKind::Directory, &entry.attrs);
                self.build_dir(ctx, source, &child_path, child, &entry.attrs)?;
                child
            } else {
                self.add_leaf(ctx, source, &child_path, entry)?
            };
            dirents.push(DirRecord::new(entry.name.clone(), child));
        }

        let content = encode_directory(&dirents).map_err(|e| ReduceError::InvalidSource {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let blocks = ctx.blockify_bytes(&content)?;
        let mut rec = record(InodeKind::Directory, attrs);
        rec.nlink = 2 + subdirs;
        rec.size = content.len() as u64;
        rec.blocks = blocks;
        self.records[(ino - 1) as usize] = rec;
        self.stats.directories += 1;
        Ok(())
    }

    fn add_leaf<S: FblockSink>(
        &mut self,
        ctx: &mut BuildContext<S>,
        source: &dyn SourceTree,
        path: &Path,
        entry: &SourceEntry,
    ) -> Result<InodeId, ReduceError> {
        let rec = match &entry.kind {
            SourceKind::File { len, link } => {
                self.stats.files += 1;
                if let Some(&ino) = link.as_ref().and_then(|key| self.links.get(key)) {
                    self.stats.hardlinks += 1;
                    self.records[(ino - 1) as usize].nlink += 1;
                    return Ok(ino);
                }
                let mut reader = source.open(path)?;
                let (blocks, size) = ctx.blockify(&mut *reader)?;
                if size != *len {
                    warn!(path = %path.display(), expected = len, actual = size, "file changed while reading");
                }
                self.stats.bytes_of_files += size;
                let mut rec = record(InodeKind::File, &entry.attrs);
                rec.size = size;
                rec.blocks = blocks;
                let ino = self.share(rec);
                if let Some(key) = link {
                    self.links.insert(*key, ino);
                }
                return Ok(ino);
            }
            SourceKind::Directory => {
                return Err(ReduceError::InvalidSource {
                    path: path.display().to_string(),
                    reason: "directory passed as leaf".to_string(),
                })
            }
            SourceKind::Symlink { target } => {
                self.stats.symlinks += 1;
                let mut rec = record(InodeKind::Symlink, &entry.attrs);
                rec.size = target.len() as u64;
                rec.blocks = ctx.blockify_bytes(target)?;
                rec
            }
            SourceKind::BlockDevice { rdev } => {
                self.stats.special += 1;
                let mut rec = record(InodeKind::BlockDevice, &entry.attrs);
                rec.rdev = *rdev;
                rec
            }
            SourceKind::CharDevice { rdev } => {
                self.stats.special += 1;
                let mut rec = record(InodeKind::CharDevice, &entry.attrs);
                rec.rdev = *rdev;
                rec
            }
            SourceKind::Fifo => {
                self.stats.special += 1;
                record(InodeKind::Fifo, &entry.attrs)
            }
            SourceKind::Socket => {
                self.stats.special += 1;
                record(InodeKind::Socket, &entry.attrs)
            }
        };
        Ok(self.share(rec))
    }

    /// Inode for `rec` (with `nlink` 0), reusing an identical one.
    fn share(&mut self, rec: InodeRecord) -> InodeId {
        if let Some(&ino) = self.shared.get(&rec) {
            self.stats.inodes_shared += 1;
            self.records[(ino - 1) as usize].nlink += 1;
            return ino;
        }
        let mut stored = rec.clone();
        stored.nlink = 1;
        self.records.push(stored);
        let ino = self.records.len() as InodeId;
        self.shared.insert(rec, ino);
        ino
    }
}
