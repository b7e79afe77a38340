//! Random-access sources an image can be mounted from.

use crate::error::Result;
use solidfs_storage::StorageError;
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;

/// Immutable bytes addressed by offset.
pub trait ImageSource: Send + Sync {
    /// Total length in bytes.
    fn len(&self) -> u64;

    /// True for a zero-length source.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fills `buf` from `offset`; short sources are an error.
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()>;

    /// Reads `len` bytes at `offset` into a new buffer.
    fn read_vec(&self, offset: u64, len: usize, what: &'static str) -> Result<Vec<u8>> {
        let end = offset.checked_add(len as u64);
        if end.map_or(true, |end| end > self.len()) {
            return Err(StorageError::OffsetOutOfRange {
                what,
                offset,
                length: len as u64,
                limit: self.len(),
            }
            .into());
        }
        let mut buf = vec![0u8; len];
        self.read_exact_at(&mut buf, offset)?;
        Ok(buf)
    }
}

/// An image file opened read-only.
#[derive(Debug)]
pub struct FileImage {
    file: File,
    len: u64,
}

impl FileImage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }
}

impl ImageSource for FileImage {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }
}

impl ImageSource for Vec<u8> {
    fn len(&self) -> u64 {
        self.as_slice().len() as u64
    }

    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let src = start
            .checked_add(buf.len())
            .and_then(|end| self.get(start..end))
            .ok_or(StorageError::OffsetOutOfRange {
                what: "image",
                offset,
                length: buf.len() as u64,
                limit: self.as_slice().len() as u64,
            })?;
        buf.copy_from_slice(src);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn vec_reads_are_bounds_checked() {
        let img = vec![1u8, 2, 3, 4];
        assert_eq!(img.read_vec(1, 2, "test").unwrap(), vec![2, 3]);
        assert!(img.read_vec(3, 2, "test").is_err());
        assert!(img.read_vec(u64::MAX, 1, "test").is_err());
    }

    #[test]
    fn file_image_reads_at_offsets() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();
        tmp.flush().unwrap();
        let img = FileImage::open(tmp.path()).unwrap();
        assert_eq!(img.len(), 10);
        assert_eq!(img.read_vec(6, 4, "test").unwrap(), b"6789");
        assert!(img.read_vec(8, 4, "test").is_err());
    }
}
