//! The tree an image is built from.
//!
//! Walking a real directory is the caller's business; the encoder only sees
//! this trait. Paths are relative to the source root, which is the empty
//! path.

use crate::error::ReduceError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Ownership, permissions and timestamp of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceAttrs {
    /// Permission bits, including setuid/setgid/sticky.
    pub perm: u32,
    /// Owner.
    pub uid: u32,
    /// Group.
    pub gid: u32,
    /// Modification time, seconds since the epoch.
    pub mtime: i64,
}

impl SourceAttrs {
    /// Attributes with the given permissions, owned by root, at the epoch.
    pub fn with_perm(perm: u32) -> Self {
        Self {
            perm,
            uid: 0,
            gid: 0,
            mtime: 0,
        }
    }
}

/// Identifies one underlying file shared by several hard links.
pub type LinkKey = (u64, u64);

/// What an entry is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    /// Regular file of `len` bytes; entries with equal `link` are hard links.
    File {
        /// Expected length.
        len: u64,
        /// Device and inode of the underlying file, when known.
        link: Option<LinkKey>,
    },
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink {
        /// Link target, stored verbatim.
        target: Vec<u8>,
    },
    /// Block device.
    BlockDevice {
        /// Device number.
        rdev: u32,
    },
    /// Character device.
    CharDevice {
        /// Device number.
        rdev: u32,
    },
    /// Named pipe.
    Fifo,
    /// Unix socket.
    Socket,
}

/// One child of a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    /// File name (a single component).
    pub name: Vec<u8>,
    /// Kind and kind-specific data.
    pub kind: SourceKind,
    /// Attributes.
    pub attrs: SourceAttrs,
}

/// Read access to a tree of files.
pub trait SourceTree {
    /// Attributes of the root directory.
    fn root_attrs(&self) -> Result<SourceAttrs, ReduceError>;

    /// Children of the directory at `dir`, in any order.
    fn list(&self, dir: &Path) -> Result<Vec<SourceEntry>, ReduceError>;

    /// Content of the regular file at `path`.
    fn open(&self, path: &Path) -> Result<Box<dyn Read + '_>, ReduceError>;
}

#[derive(Debug, Clone)]
enum MemNode {
    File {
        data: Arc<Vec<u8>>,
        link: Option<LinkKey>,
    },
    Directory,
    Other(SourceKind),
}

/// A tree held in memory, for tests and for embedders that generate files.
#[derive(Debug, Clone)]
pub struct MemoryTree {
    nodes: BTreeMap<PathBuf, (MemNode, SourceAttrs)>,
    next_link: u64,
}

impl Default for MemoryTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTree {
    /// Creates a tree holding only the root directory.
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            PathBuf::new(),
            (MemNode::Directory, SourceAttrs::with_perm(0o755)),
        );
        Self {
            nodes,
            next_link: 1,
        }
    }

    fn ensure_parents(&mut self, path: &Path) {
        let mut parent = path.parent();
        while let Some(dir) = parent {
            self.nodes
                .entry(dir.to_path_buf())
                .or_insert((MemNode::Directory, SourceAttrs::with_perm(0o755)));
            parent = dir.parent();
        }
    }

    fn insert(&mut self, path: impl AsRef<Path>, node: MemNode, attrs: SourceAttrs) -> &mut Self {
        let path = path.as_ref();
        self.ensure_parents(path);
        self.nodes.insert(path.to_path_buf(), (node, attrs));
        self
    }

    /// Adds a regular file, creating missing parent directories.
    pub fn add_file(&mut self, path: impl AsRef<Path>, data: impl Into<Vec<u8>>) -> &mut Self {
        let node = MemNode::File {
            data: Arc::new(data.into()),
            link: None,
        };
        self.insert(path, node, SourceAttrs::with_perm(0o644))
    }

    /// Adds an empty directory.
    pub fn add_dir(&mut self, path: impl AsRef<Path>) -> &mut Self {
        self.insert(path, MemNode::Directory, SourceAttrs::with_perm(0o755))
    }

    /// Adds a symbolic link.
    pub fn add_symlink(&mut self, path: impl AsRef<Path>, target: impl Into<Vec<u8>>) -> &mut Self {
        let node = MemNode::Other(SourceKind::Symlink {
            target: target.into(),
        });
        self.insert(path, node, SourceAttrs::with_perm(0o777))
    }

    /// Adds a device, FIFO or socket.
    pub fn add_special(&mut self, path: impl AsRef<Path>, kind: SourceKind) -> &mut Self {
        self.insert(path, MemNode::Other(kind), SourceAttrs::with_perm(0o600))
    }

    /// Makes `path` a hard link to the existing regular file `existing`.
    pub fn add_hardlink(
        &mut self,
        path: impl AsRef<Path>,
        existing: impl AsRef<Path>,
    ) -> Result<&mut Self, ReduceError> {
        let existing = existing.as_ref();
        let Some((MemNode::File { data, link }, attrs)) = self.nodes.get(existing).cloned() else {
            return Err(ReduceError::InvalidSource {
                path: existing.display().to_string(),
                reason: "hard link target is not a regular file".to_string(),
            });
        };
        let link = match link {
            Some(key) => key,
            None => {
                let key = (0, self.next_link);
                self.next_link += 1;
                if let Some((MemNode::File { link, .. }, _)) = self.nodes.get_mut(existing) {
                    *link = Some(key);
                }
                key
            }
        };
        let node = MemNode::File {
            data,
            link: Some(link),
        };
        Ok(self.insert(path, node, attrs))
    }

    /// Overrides the attributes of an existing entry.
    pub fn set_attrs(&mut self, path: impl AsRef<Path>, attrs: SourceAttrs) -> &mut Self {
        if let Some(node) = self.nodes.get_mut(path.as_ref()) {
            node.1 = attrs;
        }
        self
    }

    fn missing(path: &Path, what: &str) -> ReduceError {
        ReduceError::InvalidSource {
            path: path.display().to_string(),
            reason: format!("not a {}", what),
        }
    }
}

impl SourceTree for MemoryTree {
    fn root_attrs(&self) -> Result<SourceAttrs, ReduceError> {
        self.nodes
            .get(Path::new(""))
            .map(|(_, attrs)| *attrs)
            .ok_or_else(|| Self::missing(Path::new(""), "directory"))
    }

    fn list(&self, dir: &Path) -> Result<Vec<SourceEntry>, ReduceError> {
        match self.nodes.get(dir) {
            Some((MemNode::Directory, _)) => {}
            _ => return Err(Self::missing(dir, "directory")),
        }
        Ok(self
            .nodes
            .iter()
            .filter(|(path, _)| path.parent() == Some(dir))
            .filter_map(|(path, (node, attrs))| {
                let name = path.file_name()?.as_bytes().to_vec();
                let kind = match node {
                    MemNode::File { data, link } => SourceKind::File {
                        len: data.len() as u64,
                        link: *link,
                    },
                    MemNode::Directory => SourceKind::Directory,
                    MemNode::Other(kind) => kind.clone(),
                };
                Some(SourceEntry {
                    name,
                    kind,
                    attrs: *attrs,
                })
            })
            .collect())
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Read + '_>, ReduceError> {
        match self.nodes.get(path) {
            Some((MemNode::File { data, .. }, _)) => Ok(Box::new(data.as_slice())),
            _ => Err(Self::missing(path, "regular file")),
        }
    }
}
