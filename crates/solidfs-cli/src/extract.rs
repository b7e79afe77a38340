//! Unpacking a mounted image into a host directory.

use anyhow::{Context, Result};
use serde::Serialize;
use solidfs_mount::{FileAttr, FileType, SolidFs};
use solidfs_storage::InodeId;
use std::collections::HashMap;
use std::ffi::{CString, OsStr};
use std::fs::{self, File, Permissions};
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

const CHUNK: u64 = 1024 * 1024;

#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Restore uid and gid; usually needs root.
    pub preserve_owner: bool,
    /// Paths inside the image to extract, each with everything below it.
    /// Their parent directories are created too. Empty means everything.
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractStats {
    pub directories: u64,
    pub files: u64,
    pub hardlinks: u64,
    pub symlinks: u64,
    pub special: u64,
    /// Special files that could not be created.
    pub skipped: u64,
    pub bytes: u64,
}

struct Extractor<'a> {
    fs: &'a SolidFs,
    options: &'a ExtractOptions,
    /// Selected image paths without root or `.` components.
    selected: Vec<PathBuf>,
    links: HashMap<InodeId, PathBuf>,
    stats: ExtractStats,
}

fn image_relative(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}

/// Recreates the image, or the selected paths of it, under `dest`, which
/// may already exist.
pub fn extract(fs: &SolidFs, dest: &Path, options: &ExtractOptions) -> Result<ExtractStats> {
    for path in &options.paths {
        fs.lookup(path)
            .with_context(|| format!("{} is not in the image", path.display()))?;
    }
    fs::create_dir_all(dest).with_context(|| format!("creating {}", dest.display()))?;
    let mut extractor = Extractor {
        fs,
        options,
        selected: options.paths.iter().map(|p| image_relative(p)).collect(),
        links: HashMap::new(),
        stats: ExtractStats::default(),
    };
    let root = fs.root();
    extractor.directory(root, dest, Path::new(""))?;
    extractor.finish(&fs.getattr(root)?, dest)?;
    Ok(extractor.stats)
}

impl Extractor<'_> {
    /// Everything is wanted at or below a selected path.
    fn wanted(&self, rel: &Path) -> bool {
        self.selected.is_empty() || self.selected.iter().any(|s| rel.starts_with(s))
    }

    /// A directory on the way to a selected path.
    fn on_the_way(&self, rel: &Path) -> bool {
        self.selected.iter().any(|s| s.starts_with(rel))
    }

    fn directory(&mut self, ino: InodeId, dir: &Path, rel: &Path) -> Result<()> {
        for entry in self.fs.readdir(ino)? {
            let name = OsStr::from_bytes(&entry.name);
            let path = dir.join(name);
            let rel = rel.join(name);
            let wanted = self.wanted(&rel);
            if !wanted && !(entry.kind == FileType::Directory && self.on_the_way(&rel)) {
                continue;
            }
            let attr = self.fs.getattr(entry.ino)?;
            match attr.kind {
                FileType::Directory => {
                    fs::create_dir_all(&path)
                        .with_context(|| format!("creating {}", path.display()))?;
                    self.stats.directories += 1;
                    self.directory(entry.ino, &path, &rel)?;
                    self.finish(&attr, &path)?;
                }
                FileType::RegularFile => self.file(&attr, &path)?,
                FileType::Symlink => {
                    let target = self.fs.readlink(entry.ino)?;
                    symlink(OsStr::from_bytes(&target), &path)
                        .with_context(|| format!("creating symlink {}", path.display()))?;
                    self.stats.symlinks += 1;
                }
                FileType::BlockDevice
                | FileType::CharDevice
                | FileType::NamedPipe
                | FileType::Socket => {
                    if let Err(e) = make_node(&path, &attr) {
                        warn!(path = %path.display(), error = %e, "cannot create special file");
                        self.stats.skipped += 1;
                        continue;
                    }
                    self.stats.special += 1;
                    self.finish(&attr, &path)?;
                }
            }
        }
        Ok(())
    }

    fn file(&mut self, attr: &FileAttr, path: &Path) -> Result<()> {
        if let Some(first) = self.links.get(&attr.ino) {
            fs::hard_link(first, path)
                .with_context(|| format!("linking {} to {}", path.display(), first.display()))?;
            self.stats.hardlinks += 1;
            return Ok(());
        }
        let mut out =
            File::create(path).with_context(|| format!("creating {}", path.display()))?;
        let mut offset = 0;
        while offset < attr.size {
            let chunk = self.fs.read(attr.ino, offset, CHUNK)?;
            if chunk.is_empty() {
                break;
            }
            out.write_all(&chunk)?;
            offset += chunk.len() as u64;
        }
        out.flush()?;
        drop(out);
        debug!(path = %path.display(), bytes = offset, "file extracted");
        self.stats.files += 1;
        self.stats.bytes += offset;
        if attr.nlink > 1 {
            self.links.insert(attr.ino, path.to_path_buf());
        }
        self.finish(attr, path)
    }

    /// Applies ownership, permissions and mtime once content is in place.
    fn finish(&self, attr: &FileAttr, path: &Path) -> Result<()> {
        if self.options.preserve_owner {
            std::os::unix::fs::chown(path, Some(attr.uid), Some(attr.gid))
                .with_context(|| format!("chown {}", path.display()))?;
        }
        if matches!(attr.kind, FileType::RegularFile | FileType::Directory) {
            File::open(path)
                .and_then(|f| f.set_modified(attr.mtime))
                .with_context(|| format!("setting mtime of {}", path.display()))?;
        }
        fs::set_permissions(path, Permissions::from_mode(attr.perm as u32))
            .with_context(|| format!("chmod {}", path.display()))?;
        Ok(())
    }
}

fn make_node(path: &Path, attr: &FileAttr) -> std::io::Result<()> {
    let cpath = CString::new(path.as_os_str().as_bytes())?;
    let ret = unsafe {
        libc::mknod(
            cpath.as_ptr(),
            attr.mode() as libc::mode_t,
            attr.rdev as libc::dev_t,
        )
    };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use solidfs_mount::MountConfig;
    use solidfs_reduce::{build_to_vec, BuildOptions, MemoryTree, SourceAttrs, SourceKind};
    use std::os::unix::fs::MetadataExt;

    fn mounted(tree: &MemoryTree) -> SolidFs {
        let (image, _) = build_to_vec(tree, &BuildOptions::small(8, 64)).unwrap();
        SolidFs::mount(Box::new(image), MountConfig::default()).unwrap()
    }

    #[test]
    fn extracts_tree_with_metadata() {
        let mut tree = MemoryTree::new();
        tree.add_file("top.txt", "top level file")
            .add_file("a/b/deep.bin", vec![9u8; 300])
            .add_symlink("a/ln", "b/deep.bin")
            .add_dir("empty");
        tree.set_attrs(
            "top.txt",
            SourceAttrs {
                perm: 0o600,
                uid: 0,
                gid: 0,
                mtime: 1_600_000_000,
            },
        );
        let solid = mounted(&tree);
        let dest = tempfile::tempdir().unwrap();
        let out = dest.path().join("out");
        let stats = extract(&solid, &out, &ExtractOptions::default()).unwrap();

        assert_eq!(fs::read(out.join("top.txt")).unwrap(), b"top level file");
        assert_eq!(fs::read(out.join("a/b/deep.bin")).unwrap(), vec![9u8; 300]);
        assert_eq!(
            fs::read_link(out.join("a/ln")).unwrap(),
            PathBuf::from("b/deep.bin")
        );
        assert!(out.join("empty").is_dir());

        let meta = fs::metadata(out.join("top.txt")).unwrap();
        assert_eq!(meta.mode() & 0o7777, 0o600);
        assert_eq!(meta.mtime(), 1_600_000_000);

        assert_eq!(stats.files, 2);
        assert_eq!(stats.symlinks, 1);
        assert_eq!(stats.directories, 3);
        assert_eq!(stats.bytes, 14 + 300);
    }

    #[test]
    fn shared_inodes_become_hardlinks() {
        let mut tree = MemoryTree::new();
        tree.add_file("x", "same bytes").add_file("y", "same bytes");
        let solid = mounted(&tree);
        let dest = tempfile::tempdir().unwrap();
        let stats = extract(&solid, dest.path(), &ExtractOptions::default()).unwrap();
        assert_eq!(stats.files, 1);
        assert_eq!(stats.hardlinks, 1);
        let x = fs::metadata(dest.path().join("x")).unwrap();
        let y = fs::metadata(dest.path().join("y")).unwrap();
        assert_eq!(x.ino(), y.ino());
        assert_eq!(fs::read(dest.path().join("y")).unwrap(), b"same bytes");
    }

    #[test]
    fn selected_paths_only() {
        let mut tree = MemoryTree::new();
        tree.add_file("a/x", "not wanted")
            .add_file("a/sub/y", "wanted below a/sub")
            .add_file("a/sub/deeper/w", "also wanted")
            .add_file("b/z", "not wanted")
            .add_file("top", "wanted at the root");
        let solid = mounted(&tree);
        let dest = tempfile::tempdir().unwrap();
        let options = ExtractOptions {
            paths: vec![PathBuf::from("a/sub"), PathBuf::from("/top")],
            ..ExtractOptions::default()
        };
        let stats = extract(&solid, dest.path(), &options).unwrap();

        let out = dest.path();
        assert_eq!(fs::read(out.join("a/sub/y")).unwrap(), b"wanted below a/sub");
        assert_eq!(fs::read(out.join("a/sub/deeper/w")).unwrap(), b"also wanted");
        assert_eq!(fs::read(out.join("top")).unwrap(), b"wanted at the root");
        assert!(!out.join("a/x").exists());
        assert!(!out.join("b").exists());
        assert_eq!(stats.files, 3);
        assert_eq!(stats.directories, 3);
    }

    #[test]
    fn unknown_selected_path_is_an_error() {
        let mut tree = MemoryTree::new();
        tree.add_file("a", "x");
        let solid = mounted(&tree);
        let dest = tempfile::tempdir().unwrap();
        let options = ExtractOptions {
            paths: vec![PathBuf::from("missing")],
            ..ExtractOptions::default()
        };
        let err = extract(&solid, &dest.path().join("out"), &options).unwrap_err();
        assert!(err.to_string().contains("missing"));
        assert!(!dest.path().join("out").exists());
    }

    #[test]
    fn fifo_is_recreated() {
        let mut tree = MemoryTree::new();
        tree.add_special("pipe", SourceKind::Fifo);
        let solid = mounted(&tree);
        let dest = tempfile::tempdir().unwrap();
        let stats = extract(&solid, dest.path(), &ExtractOptions::default()).unwrap();
        assert_eq!(stats.special + stats.skipped, 1);
        if stats.special == 1 {
            use std::os::unix::fs::FileTypeExt;
            let meta = fs::symlink_metadata(dest.path().join("pipe")).unwrap();
            assert!(meta.file_type().is_fifo());
        }
    }
}
