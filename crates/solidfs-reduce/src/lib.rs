#![warn(missing_docs)]

//! SolidFS encode pipeline: block dedupe (BLAKE3), overlap matching, fblock packing, compression (LZ4/Zstd)
//!
//! Build path: Source tree → Blocks → Digest → Index (verify) → Overlap scan → Fblock append
//!             → Compress on close → Block table → Inode table → Image
//! The read side lives in `solidfs-mount`.

pub mod block_index;
pub mod block_table;
pub mod build;
pub mod compress_pool;
pub mod compression;
pub mod config;
pub mod context;
pub mod encoder;
pub mod error;
pub mod fblock;
pub mod fingerprint;
pub mod inode_builder;
pub mod overlap;
pub mod source;

pub use block_index::{BlockIndex, BlockIndexStats, EntryKind, IndexEntry};
pub use block_table::BlockTable;
pub use build::{build, build_to_vec, BuildReport};
pub use compress_pool::{CompressedFblock, CompressionPool};
pub use compression::{compress, decompress, CompressionAlgorithm, DEFAULT_ZSTD_LEVEL};
pub use config::BuildOptions;
pub use context::{BuildContext, FblockSink, FinishedBuild, PlacementStats};
pub use encoder::{encode_image, select_width, EncodedImage, RegionWriter};
pub use error::ReduceError;
pub use fblock::{FblockStore, FblockStoreConfig, FblockStoreStats, SealedFblock};
pub use fingerprint::{blake3_digest, Blake3Hasher, BlockDigest, ContentHasher};
pub use inode_builder::{InodeBuilder, InodeList, TreeStats};
pub use overlap::{tail_overlap, Horspool, NoScan, Placement, PlacementStrategy, RecentFirstScan};
pub use source::{LinkKey, MemoryTree, SourceAttrs, SourceEntry, SourceKind, SourceTree};
