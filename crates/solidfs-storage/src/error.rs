//! Error types for the on-disk format layer.

use thiserror::Error;

/// Result type alias for format operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error variants for encoding and decoding image structures.
///
/// Every variant except `Io` and `BlockNumberOverflow` describes structural
/// corruption of an image: a mount that hits one of them must refuse.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Superblock is corrupted or invalid.
    #[error("Corrupted superblock: {reason}")]
    CorruptedSuperblock {
        /// Description of the corruption.
        reason: String,
    },

    /// A section or record points outside the range it must lie in.
    #[error("{what} out of range: offset {offset} + length {length} exceeds {limit}")]
    OffsetOutOfRange {
        /// Which structure was being addressed.
        what: &'static str,
        /// Start offset.
        offset: u64,
        /// Length of the addressed range.
        length: u64,
        /// The bound that was exceeded.
        limit: u64,
    },

    /// A length recorded in the image disagrees with the data found.
    #[error("{what} length mismatch: expected {expected}, found {actual}")]
    LengthMismatch {
        /// Which structure was being decoded.
        what: &'static str,
        /// Recorded length.
        expected: u64,
        /// Observed length.
        actual: u64,
    },

    /// An inode record could not be decoded.
    #[error("Invalid inode {ino}: {reason}")]
    InvalidInode {
        /// Inode number.
        ino: u64,
        /// Description of the problem.
        reason: String,
    },

    /// Directory content could not be decoded.
    #[error("Invalid directory content: {reason}")]
    InvalidDirectory {
        /// Description of the problem.
        reason: String,
    },

    /// A block number does not fit the selected on-disk width.
    #[error("Block number {block} does not fit in {width_bytes}-byte block numbers")]
    BlockNumberOverflow {
        /// Offending block number.
        block: u64,
        /// Selected width in bytes.
        width_bytes: u8,
    },
}

impl StorageError {
    /// True when the error means the image itself is malformed.
    pub fn is_corruption(&self) -> bool {
        !matches!(
            self,
            StorageError::IoError(_) | StorageError::BlockNumberOverflow { .. }
        )
    }
}
