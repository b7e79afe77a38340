//! SolidFS read path.
//!
//! [`SolidFs`] mounts an image from any [`ImageSource`], resolves paths and
//! inode numbers, and serves byte ranges through a bounded cache of
//! decompressed fblocks. Host filesystem adapters sit on top of it and use
//! [`MountError::to_errno`] for their replies.

pub mod attr;
pub mod dir_cache;
pub mod error;
pub mod fblock_cache;
pub mod fs;
pub mod image;
pub mod layout;
pub mod resolver;

pub use attr::{DirEntry, FileAttr, FileType};
pub use dir_cache::{DirCache, DirCacheConfig, DirCacheStats};
pub use error::{MountError, Result};
pub use fblock_cache::{FblockCache, FblockCacheConfig, FblockCacheStats};
pub use fs::{ImageInfo, MountConfig, SolidFs};
pub use image::{FileImage, ImageSource};
pub use layout::{FblockExtent, ImageLayout};
pub use resolver::{plan_read, Span};
