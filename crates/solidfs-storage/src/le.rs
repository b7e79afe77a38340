//! Little-endian field cursor used by the record decoders.

use crate::error::{StorageError, StorageResult};

/// Bounds-checked reader over a byte slice.
pub struct LeCursor<'a> {
    data: &'a [u8],
    pos: usize,
    what: &'static str,
}

impl<'a> LeCursor<'a> {
    /// Creates a cursor at the start of `data`. `what` names the structure in errors.
    pub fn new(data: &'a [u8], what: &'static str) -> Self {
        Self { data, pos: 0, what }
    }

    /// Current position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left after the cursor.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Takes the next `len` bytes.
    pub fn take(&mut self, len: usize) -> StorageResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(StorageError::OffsetOutOfRange {
                what: self.what,
                offset: self.pos as u64,
                length: len as u64,
                limit: self.data.len() as u64,
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> StorageResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Reads a `u8`.
    pub fn u8(&mut self) -> StorageResult<u8> {
        Ok(self.array::<1>()?[0])
    }

    /// Reads a little-endian `u16`.
    pub fn u16(&mut self) -> StorageResult<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    /// Reads a little-endian `u32`.
    pub fn u32(&mut self) -> StorageResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    /// Reads a little-endian `u64`.
    pub fn u64(&mut self) -> StorageResult<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    /// Reads a little-endian `i64`.
    pub fn i64(&mut self) -> StorageResult<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    /// Reads an unsigned integer stored in `width` little-endian bytes.
    pub fn uint_n(&mut self, width: usize) -> StorageResult<u64> {
        let bytes = self.take(width)?;
        let mut buf = [0u8; 8];
        buf[..width].copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }
}

/// Appends the low `width` bytes of `value` in little-endian order.
pub fn put_uint_n(out: &mut Vec<u8>, value: u64, width: usize) {
    out.extend_from_slice(&value.to_le_bytes()[..width]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_fields_in_order() {
        let mut buf = Vec::new();
        buf.push(7u8);
        buf.extend_from_slice(&0xBEEFu16.to_le_bytes());
        buf.extend_from_slice(&0xDEADBEEFu32.to_le_bytes());
        buf.extend_from_slice(&u64::MAX.to_le_bytes());
        put_uint_n(&mut buf, 0x00AB_CDEF, 3);

        let mut cur = LeCursor::new(&buf, "test");
        assert_eq!(cur.u8().unwrap(), 7);
        assert_eq!(cur.u16().unwrap(), 0xBEEF);
        assert_eq!(cur.u32().unwrap(), 0xDEADBEEF);
        assert_eq!(cur.u64().unwrap(), u64::MAX);
        assert_eq!(cur.uint_n(3).unwrap(), 0x00AB_CDEF);
        assert_eq!(cur.remaining(), 0);
    }

    #[test]
    fn short_input_is_out_of_range() {
        let buf = [1u8, 2, 3];
        let mut cur = LeCursor::new(&buf, "record");
        let err = cur.u32().unwrap_err();
        assert!(matches!(
            err,
            StorageError::OffsetOutOfRange {
                what: "record",
                length: 4,
                limit: 3,
                ..
            }
        ));
    }
}
