use crate::attr::{DirEntry, FileAttr, FileType};
use crate::dir_cache::{DirCache, DirCacheConfig, DirCacheStats};
use crate::error::{MountError, Result};
use crate::fblock_cache::{FblockCache, FblockCacheConfig, FblockCacheStats};
use crate::image::{FileImage, ImageSource};
use crate::layout::ImageLayout;
use crate::resolver::plan_read;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use solidfs_reduce::decompress;
use solidfs_storage::{
    decode_directory, find_entry, offset_slot, FblockId, InodeId, InodeKind, InodeRecord,
    INODE_HEADER_SIZE, INODE_OFFSET_SIZE, ROOT_INODE,
};
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::path::{Component, Path};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    pub fblock_cache: FblockCacheConfig,
    pub dir_cache: DirCacheConfig,
    /// Decoded inode records kept at once.
    pub inode_cache_capacity: usize,
}

impl Default for MountConfig {
    fn default() -> Self {
        MountConfig {
            fblock_cache: FblockCacheConfig::default(),
            dir_cache: DirCacheConfig::default(),
            inode_cache_capacity: 4_096,
        }
    }
}

/// Summary of a mounted image, as printed by `solidfs info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub image_len: u64,
    pub version: u32,
    pub block_size: u32,
    pub fblock_cap: u32,
    pub blocknum_width: u8,
    pub compression: String,
    pub block_count: u64,
    pub inode_count: u64,
    pub fblock_count: u32,
    pub bytes_of_files: u64,
    pub fblock_region_len: u64,
    pub block_table_len: u64,
    pub inode_table_len: u64,
}

impl ImageInfo {
    /// Bytes of regular files per byte of image.
    pub fn ratio(&self) -> f64 {
        if self.image_len == 0 {
            return 0.0;
        }
        self.bytes_of_files as f64 / self.image_len as f64
    }
}

/// A mounted image. All operations take `&self` and may run concurrently.
pub struct SolidFs {
    source: Box<dyn ImageSource>,
    layout: ImageLayout,
    fblocks: FblockCache,
    dirs: Mutex<DirCache>,
    inodes: Mutex<LruCache<InodeId, Arc<InodeRecord>>>,
    parents: Mutex<HashMap<InodeId, InodeId>>,
}

impl SolidFs {
    /// Validates the image structure and prepares the caches. Fblock
    /// payloads are not touched until a read needs them.
    #[instrument(skip(source, config), fields(len = source.len()))]
    pub fn mount(source: Box<dyn ImageSource>, config: MountConfig) -> Result<Self> {
        let layout = ImageLayout::load(source.as_ref())?;
        let inode_capacity =
            NonZeroUsize::new(config.inode_cache_capacity).unwrap_or(NonZeroUsize::MIN);
        let fs = SolidFs {
            source,
            layout,
            fblocks: FblockCache::new(config.fblock_cache),
            dirs: Mutex::new(DirCache::new(config.dir_cache)),
            inodes: Mutex::new(LruCache::new(inode_capacity)),
            parents: Mutex::new(HashMap::from([(ROOT_INODE, ROOT_INODE)])),
        };
        let root = fs.record(ROOT_INODE)?;
        if root.kind != InodeKind::Directory {
            return Err(MountError::NotDirectory { ino: ROOT_INODE });
        }
        debug!(
            inodes = fs.layout.superblock.inode_count,
            blocks = fs.layout.superblock.block_count,
            "image mounted"
        );
        Ok(fs)
    }

    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, config: MountConfig) -> Result<Self> {
        let image = FileImage::open(path.as_ref())?;
        Self::mount(Box::new(image), config)
    }

    pub fn root(&self) -> InodeId {
        ROOT_INODE
    }

    /// Resolves a path relative to the image root. Leading `/`, `.` and
    /// `..` components are honored; `..` at the root stays at the root.
    pub fn lookup(&self, path: impl AsRef<Path>) -> Result<InodeId> {
        let mut stack = vec![ROOT_INODE];
        for component in path.as_ref().components() {
            match component {
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
                Component::ParentDir => {
                    if stack.len() > 1 {
                        stack.pop();
                    }
                }
                Component::Normal(name) => {
                    let parent = *stack.last().unwrap_or(&ROOT_INODE);
                    let child = self.lookup_child(parent, name.as_encoded_bytes())?;
                    stack.push(child);
                }
            }
        }
        Ok(*stack.last().unwrap_or(&ROOT_INODE))
    }

    pub fn lookup_child(&self, parent: InodeId, name: &[u8]) -> Result<InodeId> {
        match name {
            b"." => {
                self.directory(parent)?;
                Ok(parent)
            }
            b".." => {
                self.directory(parent)?;
                self.parent_of(parent)
            }
            _ => {
                let entries = self.directory(parent)?;
                find_entry(entries.as_slice(), name)
                    .map(|e| e.ino)
                    .ok_or_else(|| MountError::NameNotFound {
                        parent,
                        name: String::from_utf8_lossy(name).into_owned(),
                    })
            }
        }
    }

    /// Parent of a directory. Parents are recorded as listings are decoded;
    /// a directory reached by inode number alone is found by walking down
    /// from the root.
    fn parent_of(&self, dir: InodeId) -> Result<InodeId> {
        if let Some(parent) = self.parents.lock().get(&dir).copied() {
            return Ok(parent);
        }
        let mut pending = vec![ROOT_INODE];
        let mut seen = HashSet::from([ROOT_INODE]);
        while let Some(next) = pending.pop() {
            for entry in self.directory(next)?.iter() {
                if entry.kind != FileType::Directory || !seen.insert(entry.ino) {
                    continue;
                }
                if entry.ino == dir {
                    debug!(dir, parent = next, "parent found by walking the tree");
                    return Ok(next);
                }
                pending.push(entry.ino);
            }
        }
        Err(MountError::NotFound { ino: dir })
    }

    pub fn getattr(&self, ino: InodeId) -> Result<FileAttr> {
        let record = self.record(ino)?;
        Ok(FileAttr::from_record(
            ino,
            &record,
            self.layout.superblock.block_size,
        ))
    }

    /// Entries of a directory sorted by name, without `.` and `..`.
    pub fn readdir(&self, ino: InodeId) -> Result<Vec<DirEntry>> {
        Ok(self.directory(ino)?.as_ref().clone())
    }

    /// Reads up to `len` bytes at `offset`. Short at end of file and empty
    /// past it.
    #[instrument(level = "debug", skip(self))]
    pub fn read(&self, ino: InodeId, offset: u64, len: u64) -> Result<Vec<u8>> {
        let record = self.record(ino)?;
        if record.kind == InodeKind::Directory {
            return Err(MountError::IsDirectory { ino });
        }
        self.read_content(ino, &record, offset, len)
    }

    pub fn readlink(&self, ino: InodeId) -> Result<Vec<u8>> {
        let record = self.record(ino)?;
        if record.kind != InodeKind::Symlink {
            return Err(MountError::NotSymlink { ino });
        }
        self.read_content(ino, &record, 0, record.size)
    }

    pub fn info(&self) -> ImageInfo {
        let sb = &self.layout.superblock;
        ImageInfo {
            image_len: sb.image_len,
            version: sb.version,
            block_size: sb.block_size,
            fblock_cap: sb.fblock_cap,
            blocknum_width: sb.blocknum_width.bytes(),
            compression: self.layout.compression.to_string(),
            block_count: sb.block_count,
            inode_count: sb.inode_count,
            fblock_count: sb.fblock_count,
            bytes_of_files: sb.bytes_of_files,
            fblock_region_len: sb.fblock_region.length,
            block_table_len: sb.block_table.length,
            inode_table_len: self.layout.inode_table.size,
        }
    }

    pub fn fblock_cache_stats(&self) -> FblockCacheStats {
        self.fblocks.stats()
    }

    pub fn dir_cache_stats(&self) -> DirCacheStats {
        self.dirs.lock().stats()
    }

    fn directory(&self, ino: InodeId) -> Result<Arc<Vec<DirEntry>>> {
        if let Some(hit) = self.dirs.lock().get(ino) {
            return Ok(hit);
        }
        let record = self.record(ino)?;
        if record.kind != InodeKind::Directory {
            return Err(MountError::NotDirectory { ino });
        }
        let raw = self.read_content(ino, &record, 0, record.size)?;
        let decoded = decode_directory(&raw, self.layout.superblock.inode_count)?;
        let mut entries = Vec::with_capacity(decoded.len());
        for child in decoded {
            let kind: FileType = self.record(child.ino)?.kind.into();
            if kind == FileType::Directory {
                self.parents.lock().insert(child.ino, ino);
            }
            entries.push(DirEntry {
                ino: child.ino,
                name: child.name,
                kind,
            });
        }
        let entries = Arc::new(entries);
        self.dirs.lock().insert(ino, entries.clone());
        Ok(entries)
    }

    fn record(&self, ino: InodeId) -> Result<Arc<InodeRecord>> {
        if ino == 0 || ino > self.layout.superblock.inode_count {
            return Err(MountError::NotFound { ino });
        }
        if let Some(hit) = self.inodes.lock().get(&ino) {
            return Ok(hit.clone());
        }
        let record = Arc::new(self.load_record(ino)?);
        self.inodes.lock().put(ino, record.clone());
        Ok(record)
    }

    fn load_record(&self, ino: InodeId) -> Result<InodeRecord> {
        let sb = &self.layout.superblock;
        let table = &self.layout.inode_table;
        let slot = self.read_content(0, table, offset_slot(ino), INODE_OFFSET_SIZE as u64)?;
        let offset = slot
            .try_into()
            .map(u64::from_le_bytes)
            .map_err(|_| corrupt_inode(ino, "offset slot past end of inode table"))?;
        let header = self.read_content(0, table, offset, INODE_HEADER_SIZE as u64)?;
        if header.len() != INODE_HEADER_SIZE {
            return Err(corrupt_inode(ino, "record past end of inode table"));
        }
        let mut record = InodeRecord::decode_header(ino, &header)?;
        let list_len = record
            .block_count(sb.block_size)
            .saturating_mul(sb.blocknum_width.bytes() as u64);
        let list = self.read_content(
            0,
            table,
            offset.saturating_add(INODE_HEADER_SIZE as u64),
            list_len,
        )?;
        record.decode_blocks(ino, &list, sb.block_size, sb.blocknum_width)?;
        Ok(record)
    }

    fn read_content(
        &self,
        ino: InodeId,
        record: &InodeRecord,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>> {
        let spans = plan_read(record.size, self.layout.superblock.block_size, offset, len);
        let total: u64 = spans.iter().map(|s| s.len as u64).sum();
        let mut out = Vec::with_capacity(total as usize);
        for span in spans {
            let block = *record
                .blocks
                .get(span.index)
                .ok_or_else(|| corrupt_inode(ino, "block list shorter than size"))?;
            let locator = self.layout.locator(block)?;
            let expected = self.layout.expected_block_len(record.size, span.index);
            if locator.length != expected {
                return Err(corrupt_inode(
                    ino,
                    &format!(
                        "block {} has length {}, expected {}",
                        block, locator.length, expected
                    ),
                ));
            }
            let raw = self.fblock(locator.fblock)?;
            locator.check_within(raw.len())?;
            let start = locator.offset as usize + span.intra_offset as usize;
            out.extend_from_slice(&raw[start..start + span.len as usize]);
        }
        Ok(out)
    }

    fn fblock(&self, id: FblockId) -> Result<Arc<Vec<u8>>> {
        self.fblocks.get_or_load(id, || {
            let extent = self.layout.fblocks[id.0 as usize];
            let payload = self
                .source
                .read_vec(extent.offset, extent.length as usize, "fblock")?;
            decompress(
                &payload,
                self.layout.compression,
                self.layout.superblock.fblock_cap as usize,
            )
            .map_err(|e| {
                warn!(fblock = id.0, error = %e, "fblock decompression failed");
                MountError::Decompression {
                    fblock: id.0,
                    reason: e.to_string(),
                }
            })
        })
    }
}

fn corrupt_inode(ino: InodeId, reason: &str) -> MountError {
    MountError::CorruptSection {
        section: if ino == 0 { "inode table" } else { "inode" },
        reason: format!("inode {}: {}", ino, reason),
    }
}
