use solidfs_storage::{InodeId, StorageError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MountError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupted image: {0}")]
    Storage(#[from] StorageError),

    #[error("Corrupted {section}: {reason}")]
    CorruptSection {
        section: &'static str,
        reason: String,
    },

    #[error("Decompression of fblock {fblock} failed: {reason}")]
    Decompression { fblock: u32, reason: String },

    #[error("Inode not found: {ino}")]
    NotFound { ino: InodeId },

    #[error("No entry {name:?} in directory {parent}")]
    NameNotFound { parent: InodeId, name: String },

    #[error("Not a directory: {ino}")]
    NotDirectory { ino: InodeId },

    #[error("Is a directory: {ino}")]
    IsDirectory { ino: InodeId },

    #[error("Not a symbolic link: {ino}")]
    NotSymlink { ino: InodeId },

    #[error("Invalid argument: {msg}")]
    InvalidArgument { msg: String },
}

pub type Result<T> = std::result::Result<T, MountError>;

impl MountError {
    /// errno value for host filesystem adapters.
    pub fn to_errno(&self) -> i32 {
        use libc::*;
        match self {
            MountError::Io(e) => e.raw_os_error().unwrap_or(EIO),
            MountError::Storage(_) => EIO,
            MountError::CorruptSection { .. } => EIO,
            MountError::Decompression { .. } => EIO,
            MountError::NotFound { .. } => ENOENT,
            MountError::NameNotFound { .. } => ENOENT,
            MountError::NotDirectory { .. } => ENOTDIR,
            MountError::IsDirectory { .. } => EISDIR,
            MountError::NotSymlink { .. } => EINVAL,
            MountError::InvalidArgument { .. } => EINVAL,
        }
    }

    /// True when the image itself is damaged, as opposed to a bad request.
    pub fn is_corruption(&self) -> bool {
        match self {
            MountError::Storage(e) => e.is_corruption(),
            MountError::CorruptSection { .. } | MountError::Decompression { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_errno() {
        assert_eq!(MountError::NotFound { ino: 42 }.to_errno(), libc::ENOENT);
        let err = MountError::NameNotFound {
            parent: 1,
            name: "x".into(),
        };
        assert_eq!(err.to_errno(), libc::ENOENT);
    }

    #[test]
    fn test_decompression_is_eio() {
        let err = MountError::Decompression {
            fblock: 3,
            reason: "bad frame".into(),
        };
        assert_eq!(err.to_errno(), libc::EIO);
        assert!(err.is_corruption());
        assert!(err.to_string().contains("fblock 3"));
    }

    #[test]
    fn test_storage_corruption_is_eio() {
        let err: MountError = StorageError::CorruptedSuperblock {
            reason: "bad magic".into(),
        }
        .into();
        assert_eq!(err.to_errno(), libc::EIO);
        assert!(err.is_corruption());
    }

    #[test]
    fn test_type_errors() {
        assert_eq!(MountError::NotDirectory { ino: 2 }.to_errno(), libc::ENOTDIR);
        assert_eq!(MountError::IsDirectory { ino: 2 }.to_errno(), libc::EISDIR);
        assert_eq!(MountError::NotSymlink { ino: 2 }.to_errno(), libc::EINVAL);
        assert!(!MountError::NotSymlink { ino: 2 }.is_corruption());
    }

    #[test]
    fn test_io_errno_passthrough() {
        let err = MountError::Io(std::io::Error::from_raw_os_error(libc::EACCES));
        assert_eq!(err.to_errno(), libc::EACCES);
    }
}
