#![warn(missing_docs)]

//! SolidFS on-disk format
//!
//! Fixed-width little-endian encodings of every structure in an image: the
//! superblock, the block table of data locators, inode records with their
//! variable-width block lists, and directory content.

pub mod directory;
pub mod error;
pub mod inode;
pub mod le;
pub mod locator;
pub mod superblock;

pub use directory::{
    decode_directory, encode_directory, find_entry, DirRecord, NamedEntry, MAX_NAME_LEN,
};
pub use error::{StorageError, StorageResult};
pub use inode::{
    blocks_for_size, encode_inode_table, inode_table_len, offset_slot, InodeId, InodeKind,
    InodeRecord, INODE_HEADER_SIZE, INODE_OFFSET_SIZE, ROOT_INODE,
};
pub use le::{put_uint_n, LeCursor};
pub use locator::{
    decode_block_table, encode_block_table, BlockNumWidth, BlockNumber, DataLocator, FblockId,
    LOCATOR_SIZE,
};
pub use superblock::{
    Section, Superblock, MIN_BOOTSTRAP_LIMIT, SUPERBLOCK_MAGIC, SUPERBLOCK_SIZE,
    SUPERBLOCK_VERSION,
};
