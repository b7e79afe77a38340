//! Test Harness - building, mounting and damaging images

use solidfs_mount::{ImageLayout, MountConfig, MountError, SolidFs};
use solidfs_reduce::{build_to_vec, BuildOptions, BuildReport, SourceTree};
use solidfs_storage::Superblock;
use tracing_subscriber::EnvFilter;

/// Installs a test-friendly subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// An image built in memory together with its build report.
#[derive(Debug, Clone)]
pub struct TestImage {
    pub bytes: Vec<u8>,
    pub report: BuildReport,
}

impl TestImage {
    pub fn build(tree: &dyn SourceTree, options: &BuildOptions) -> Self {
        let (bytes, report) = build_to_vec(tree, options).expect("image build failed");
        Self { bytes, report }
    }

    pub fn mount(&self) -> SolidFs {
        self.mount_with(MountConfig::default())
            .expect("mount of a fresh image failed")
    }

    pub fn mount_with(&self, config: MountConfig) -> Result<SolidFs, MountError> {
        mount_bytes(self.bytes.clone(), config)
    }

    pub fn superblock(&self) -> Superblock {
        Superblock::from_bytes(&self.bytes).expect("superblock of a fresh image")
    }

    pub fn layout(&self) -> ImageLayout {
        ImageLayout::load(&self.bytes).expect("layout of a fresh image")
    }
}

pub fn mount_bytes(bytes: Vec<u8>, config: MountConfig) -> Result<SolidFs, MountError> {
    SolidFs::mount(Box::new(bytes), config)
}

/// Whole content of the file at `path`.
pub fn read_file(fs: &SolidFs, path: &str) -> Result<Vec<u8>, MountError> {
    let ino = fs.lookup(path)?;
    let size = fs.getattr(ino)?.size;
    fs.read(ino, 0, size)
}

/// Deterministic incompressible bytes.
pub fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect()
}

/// Overwrites the compressed payload of fblock `id` with 0xFF. Neither the
/// LZ4 size prefix nor the zstd frame magic survive this, so any
/// decompression of the fblock fails while the region layout stays valid.
pub fn corrupt_fblock(image: &mut [u8], layout: &ImageLayout, id: u32) {
    let extent = layout.fblocks[id as usize];
    let start = extent.offset as usize;
    let end = start + extent.length as usize;
    image[start..end].fill(0xFF);
}

#[cfg(test)]
mod tests {
    use super::*;
    use solidfs_reduce::MemoryTree;

    #[test]
    fn test_image_builds_and_mounts() {
        init_tracing();
        let mut tree = MemoryTree::new();
        tree.add_file("x", "harness");
        let image = TestImage::build(&tree, &BuildOptions::small(4, 16));
        assert_eq!(image.report.image_len, image.bytes.len() as u64);
        assert_eq!(image.superblock().inode_count, 2);
        let fs = image.mount();
        assert_eq!(read_file(&fs, "x").unwrap(), b"harness");
    }

    #[test]
    fn test_corrupt_fblock_keeps_layout() {
        let mut tree = MemoryTree::new();
        tree.add_file("x", "harness");
        let mut image = TestImage::build(&tree, &BuildOptions::small(4, 16));
        let layout = image.layout();
        corrupt_fblock(&mut image.bytes, &layout, 0);
        assert!(ImageLayout::load(&image.bytes).is_ok());
    }
}
