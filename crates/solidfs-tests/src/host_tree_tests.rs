//! Host directory → image → host directory.

use solidfs_cli::{build_image, extract, ExtractOptions, FsSourceTree};
use solidfs_mount::{MountConfig, SolidFs};
use solidfs_reduce::{
    build, BuildOptions, MemoryTree, ReduceError, SourceAttrs, SourceEntry, SourceTree,
};
use std::fs;
use std::io::Read;
use std::os::unix::fs::{symlink, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

fn populate(root: &Path) {
    fs::create_dir_all(root.join("src/nested")).unwrap();
    fs::create_dir(root.join("empty")).unwrap();
    fs::write(root.join("README"), b"solid read only images\n").unwrap();
    fs::write(root.join("src/main.c"), b"int main(void) { return 0; }\n").unwrap();
    fs::write(root.join("src/nested/copy.c"), b"int main(void) { return 0; }\n").unwrap();
    let blob: Vec<u8> = (0..50_000u32).map(|i| (i / 7 % 256) as u8).collect();
    fs::write(root.join("blob.bin"), blob).unwrap();
    fs::hard_link(root.join("README"), root.join("README.link")).unwrap();
    symlink("src/main.c", root.join("entry")).unwrap();
    fs::set_permissions(root.join("src/main.c"), fs::Permissions::from_mode(0o700)).unwrap();
}

fn assert_same_tree(a: &Path, b: &Path) {
    let mut names: Vec<_> = fs::read_dir(a).unwrap().map(|e| e.unwrap().file_name()).collect();
    names.sort();
    let mut other: Vec<_> = fs::read_dir(b).unwrap().map(|e| e.unwrap().file_name()).collect();
    other.sort();
    assert_eq!(names, other, "listing of {}", a.display());
    for name in names {
        let (pa, pb) = (a.join(&name), b.join(&name));
        let (ma, mb) = (
            fs::symlink_metadata(&pa).unwrap(),
            fs::symlink_metadata(&pb).unwrap(),
        );
        assert_eq!(ma.file_type(), mb.file_type(), "{}", pa.display());
        if ma.file_type().is_symlink() {
            assert_eq!(fs::read_link(&pa).unwrap(), fs::read_link(&pb).unwrap());
            continue;
        }
        assert_eq!(ma.mode() & 0o7777, mb.mode() & 0o7777, "{}", pa.display());
        if ma.is_dir() {
            assert_same_tree(&pa, &pb);
        } else {
            assert_eq!(fs::read(&pa).unwrap(), fs::read(&pb).unwrap());
            assert_eq!(ma.mtime(), mb.mtime(), "{}", pa.display());
        }
    }
}

#[test]
fn test_host_tree_roundtrip() {
    let src = tempfile::tempdir().unwrap();
    populate(src.path());
    let work = tempfile::tempdir().unwrap();
    let image = work.path().join("tree.sfs");

    let report = build_image(src.path(), &image, &BuildOptions::small(1024, 16 * 1024)).unwrap();
    assert_eq!(report.tree.hardlinks, 1);
    assert!(report.raw_bytes < 50_000);

    let solid = SolidFs::open(&image, MountConfig::default()).unwrap();
    let readme = solid.lookup("README").unwrap();
    assert_eq!(readme, solid.lookup("README.link").unwrap());
    assert_eq!(solid.getattr(readme).unwrap().nlink, 2);
    assert_eq!(solid.readlink(solid.lookup("entry").unwrap()).unwrap(), b"src/main.c");

    let out = work.path().join("out");
    let stats = extract(&solid, &out, &ExtractOptions::default()).unwrap();
    assert!(stats.hardlinks >= 1);
    assert_eq!(stats.symlinks, 1);
    assert_same_tree(src.path(), &out);

    let a = fs::metadata(out.join("README")).unwrap();
    let b = fs::metadata(out.join("README.link")).unwrap();
    assert_eq!(a.ino(), b.ino());
}

#[test]
fn test_rebuild_is_byte_identical() {
    let src = tempfile::tempdir().unwrap();
    populate(src.path());
    let tree = FsSourceTree::new(src.path()).unwrap();
    let work = tempfile::tempdir().unwrap();
    let options = BuildOptions::small(512, 8192);
    build(&tree, &options, &work.path().join("one.sfs")).unwrap();
    build(&tree, &options, &work.path().join("two.sfs")).unwrap();
    assert_eq!(
        fs::read(work.path().join("one.sfs")).unwrap(),
        fs::read(work.path().join("two.sfs")).unwrap()
    );
}

/// Delegates to a memory tree but fails to open one file.
struct FailingTree {
    inner: MemoryTree,
    broken: PathBuf,
}

impl SourceTree for FailingTree {
    fn root_attrs(&self) -> Result<SourceAttrs, ReduceError> {
        self.inner.root_attrs()
    }

    fn list(&self, dir: &Path) -> Result<Vec<SourceEntry>, ReduceError> {
        self.inner.list(dir)
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Read + '_>, ReduceError> {
        if path == self.broken {
            return Err(ReduceError::InvalidSource {
                path: path.display().to_string(),
                reason: "unreadable".to_string(),
            });
        }
        self.inner.open(path)
    }
}

#[test]
fn test_failed_build_publishes_nothing() {
    let mut inner = MemoryTree::new();
    inner
        .add_file("a", vec![1u8; 10_000])
        .add_file("z/bad", "never read");
    let tree = FailingTree {
        inner,
        broken: PathBuf::from("z/bad"),
    };
    let work = tempfile::tempdir().unwrap();
    let dest = work.path().join("never.sfs");
    let err = build(&tree, &BuildOptions::small(64, 256), &dest).unwrap_err();
    assert!(matches!(err, ReduceError::InvalidSource { .. }));
    assert!(!dest.exists());
    assert_eq!(fs::read_dir(work.path()).unwrap().count(), 0);
}

#[test]
fn test_existing_image_survives_failed_rebuild() {
    let src = tempfile::tempdir().unwrap();
    populate(src.path());
    let work = tempfile::tempdir().unwrap();
    let dest = work.path().join("tree.sfs");
    build_image(src.path(), &dest, &BuildOptions::small(1024, 8192)).unwrap();
    let before = fs::read(&dest).unwrap();

    let bad = BuildOptions {
        workers: 0,
        ..BuildOptions::small(1024, 8192)
    };
    assert!(build_image(src.path(), &dest, &bad).is_err());
    assert_eq!(fs::read(&dest).unwrap(), before);
}
