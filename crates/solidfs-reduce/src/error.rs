//! Error types for the solidfs-reduce subsystem

use solidfs_storage::StorageError;

/// All errors that can occur while building an image
#[derive(Debug, thiserror::Error)]
pub enum ReduceError {
    /// Compression operation failed
    #[error("Compression failed: {0}")]
    CompressionFailed(String),
    /// Decompression operation failed
    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),
    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// A format structure could not be encoded
    #[error("Format error: {0}")]
    Storage(#[from] StorageError),
    /// The build needs more of a bounded resource than it is allowed
    #[error("Resource exhausted: {resource} needs {requested} bytes, limit is {limit}")]
    ResourceExhausted {
        /// Which resource ran out
        resource: &'static str,
        /// Configured limit
        limit: u64,
        /// Amount that would have been in use
        requested: u64,
    },
    /// Build options are inconsistent
    #[error("Invalid build options: {0}")]
    InvalidConfig(String),
    /// The source tree returned something that cannot be stored
    #[error("Invalid source entry {path}: {reason}")]
    InvalidSource {
        /// Path of the offending entry, relative to the source root
        path: String,
        /// What was wrong with it
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_exhausted_message() {
        let err = ReduceError::ResourceExhausted {
            resource: "fblock memory",
            limit: 100,
            requested: 150,
        };
        assert_eq!(
            err.to_string(),
            "Resource exhausted: fblock memory needs 150 bytes, limit is 100"
        );
    }

    #[test]
    fn storage_errors_convert() {
        let err: ReduceError = StorageError::BlockNumberOverflow {
            block: 1 << 20,
            width_bytes: 2,
        }
        .into();
        assert!(matches!(err, ReduceError::Storage(_)));
    }
}
