//! Source tree backed by a directory on the host filesystem.

use solidfs_reduce::{ReduceError, SourceAttrs, SourceEntry, SourceKind, SourceTree};
use std::fs::{self, File, Metadata};
use std::io::{BufReader, Read};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};
use tracing::trace;

pub struct FsSourceTree {
    root: PathBuf,
}

impl FsSourceTree {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ReduceError> {
        let root = root.into();
        let meta = fs::metadata(&root).map_err(|e| source_error(&root, e))?;
        if !meta.is_dir() {
            return Err(ReduceError::InvalidSource {
                path: root.display().to_string(),
                reason: "not a directory".to_string(),
            });
        }
        Ok(Self { root })
    }

    fn full(&self, rel: &Path) -> PathBuf {
        self.root.join(rel)
    }
}

fn source_error(path: &Path, e: std::io::Error) -> ReduceError {
    ReduceError::InvalidSource {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

fn attrs(meta: &Metadata) -> SourceAttrs {
    SourceAttrs {
        perm: meta.mode() & 0o7777,
        uid: meta.uid(),
        gid: meta.gid(),
        mtime: meta.mtime(),
    }
}

fn kind(path: &Path, meta: &Metadata) -> Result<Option<SourceKind>, ReduceError> {
    let ft = meta.file_type();
    let kind = if ft.is_file() {
        SourceKind::File {
            len: meta.len(),
            link: (meta.nlink() > 1).then(|| (meta.dev(), meta.ino())),
        }
    } else if ft.is_dir() {
        SourceKind::Directory
    } else if ft.is_symlink() {
        let target = fs::read_link(path).map_err(|e| source_error(path, e))?;
        SourceKind::Symlink {
            target: target.into_os_string().into_vec(),
        }
    } else if ft.is_block_device() {
        SourceKind::BlockDevice {
            rdev: meta.rdev() as u32,
        }
    } else if ft.is_char_device() {
        SourceKind::CharDevice {
            rdev: meta.rdev() as u32,
        }
    } else if ft.is_fifo() {
        SourceKind::Fifo
    } else if ft.is_socket() {
        SourceKind::Socket
    } else {
        return Ok(None);
    };
    Ok(Some(kind))
}

impl SourceTree for FsSourceTree {
    fn root_attrs(&self) -> Result<SourceAttrs, ReduceError> {
        let meta = fs::metadata(&self.root).map_err(|e| source_error(&self.root, e))?;
        Ok(attrs(&meta))
    }

    fn list(&self, dir: &Path) -> Result<Vec<SourceEntry>, ReduceError> {
        let full = self.full(dir);
        let mut entries = Vec::new();
        for entry in fs::read_dir(&full).map_err(|e| source_error(&full, e))? {
            let entry = entry.map_err(|e| source_error(&full, e))?;
            let path = entry.path();
            let meta = fs::symlink_metadata(&path).map_err(|e| source_error(&path, e))?;
            match kind(&path, &meta)? {
                Some(kind) => entries.push(SourceEntry {
                    name: entry.file_name().as_bytes().to_vec(),
                    kind,
                    attrs: attrs(&meta),
                }),
                None => trace!(path = %path.display(), "skipping unknown file type"),
            }
        }
        Ok(entries)
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Read + '_>, ReduceError> {
        let full = self.full(path);
        let file = File::open(&full).map_err(|e| source_error(&full, e))?;
        Ok(Box::new(BufReader::new(file)))
    }
}
