use serde::{Deserialize, Serialize};
use solidfs_storage::{InodeId, InodeKind, InodeRecord, NamedEntry};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileAttr {
    pub ino: InodeId,
    pub size: u64,
    /// Allocation in 512-byte units.
    pub blocks: u64,
    pub mtime: SystemTime,
    pub kind: FileType,
    pub perm: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub blksize: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    RegularFile,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
    NamedPipe,
    Socket,
}

impl From<InodeKind> for FileType {
    fn from(kind: InodeKind) -> Self {
        match kind {
            InodeKind::File => FileType::RegularFile,
            InodeKind::Directory => FileType::Directory,
            InodeKind::Symlink => FileType::Symlink,
            InodeKind::BlockDevice => FileType::BlockDevice,
            InodeKind::CharDevice => FileType::CharDevice,
            InodeKind::Fifo => FileType::NamedPipe,
            InodeKind::Socket => FileType::Socket,
        }
    }
}

impl FileType {
    /// Single-letter type used by `ls -l`.
    pub fn indicator(self) -> char {
        match self {
            FileType::RegularFile => '-',
            FileType::Directory => 'd',
            FileType::Symlink => 'l',
            FileType::BlockDevice => 'b',
            FileType::CharDevice => 'c',
            FileType::NamedPipe => 'p',
            FileType::Socket => 's',
        }
    }
}

impl FileAttr {
    pub fn from_record(ino: InodeId, record: &InodeRecord, block_size: u32) -> Self {
        let mtime = if record.mtime >= 0 {
            UNIX_EPOCH + Duration::from_secs(record.mtime as u64)
        } else {
            UNIX_EPOCH - Duration::from_secs(record.mtime.unsigned_abs())
        };
        FileAttr {
            ino,
            size: record.size,
            blocks: record.size.div_ceil(512),
            mtime,
            kind: record.kind.into(),
            perm: (record.perm & 0o7777) as u16,
            nlink: record.nlink,
            uid: record.uid,
            gid: record.gid,
            rdev: record.rdev,
            blksize: block_size,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileType::Directory
    }

    /// Full `st_mode` with file-type bits.
    pub fn mode(&self) -> u32 {
        let kind = match self.kind {
            FileType::RegularFile => InodeKind::File,
            FileType::Directory => InodeKind::Directory,
            FileType::Symlink => InodeKind::Symlink,
            FileType::BlockDevice => InodeKind::BlockDevice,
            FileType::CharDevice => InodeKind::CharDevice,
            FileType::NamedPipe => InodeKind::Fifo,
            FileType::Socket => InodeKind::Socket,
        };
        kind.mode_bits() | self.perm as u32
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: InodeId,
    pub name: Vec<u8>,
    pub kind: FileType,
}

impl DirEntry {
    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

impl NamedEntry for DirEntry {
    fn entry_name(&self) -> &[u8] {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: InodeKind, size: u64, mtime: i64) -> InodeRecord {
        InodeRecord {
            kind,
            perm: 0o4755,
            nlink: 3,
            rdev: 0,
            uid: 1000,
            gid: 1000,
            mtime,
            size,
            blocks: Vec::new(),
        }
    }

    #[test]
    fn test_file_attr_from_record() {
        let attr = FileAttr::from_record(7, &record(InodeKind::File, 1025, 86_400), 4096);
        assert_eq!(attr.ino, 7);
        assert_eq!(attr.blocks, 3);
        assert_eq!(attr.blksize, 4096);
        assert_eq!(attr.perm, 0o4755);
        assert_eq!(attr.mode(), 0o104755);
        assert_eq!(attr.mtime, UNIX_EPOCH + Duration::from_secs(86_400));
    }

    #[test]
    fn test_negative_mtime_before_epoch() {
        let attr = FileAttr::from_record(2, &record(InodeKind::File, 0, -60), 4096);
        assert_eq!(attr.mtime, UNIX_EPOCH - Duration::from_secs(60));
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(FileType::from(InodeKind::Fifo), FileType::NamedPipe);
        assert_eq!(FileType::from(InodeKind::Directory).indicator(), 'd');
        let attr = FileAttr::from_record(1, &record(InodeKind::Directory, 30, 0), 512);
        assert!(attr.is_dir());
        assert_eq!(attr.mode() & 0o170000, 0o040000);
    }
}
