//! Content fingerprinting for the block index.
//!
//! Digests are 64 bits wide, so distinct blocks can collide. A digest match
//! is only ever a hint; the bytes are compared before anything is reused.

use serde::{Deserialize, Serialize};

/// 64-bit content digest of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockDigest(pub u64);

impl std::fmt::Display for BlockDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Computes block digests. Implementations must be deterministic.
pub trait ContentHasher: Send + Sync {
    /// Digest of `data`.
    fn digest(&self, data: &[u8]) -> BlockDigest;
}

/// Default hasher: the first 8 bytes of the BLAKE3 hash.
#[derive(Debug, Clone, Copy, Default)]
pub struct Blake3Hasher;

impl ContentHasher for Blake3Hasher {
    fn digest(&self, data: &[u8]) -> BlockDigest {
        blake3_digest(data)
    }
}

/// Truncated BLAKE3 digest of data
pub fn blake3_digest(data: &[u8]) -> BlockDigest {
    let hash = blake3::hash(data);
    let mut head = [0u8; 8];
    head.copy_from_slice(&hash.as_bytes()[..8]);
    BlockDigest(u64::from_le_bytes(head))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn digest_is_deterministic() {
        assert_eq!(blake3_digest(b"hello world"), blake3_digest(b"hello world"));
        assert_ne!(blake3_digest(b"hello"), blake3_digest(b"world"));
    }

    #[test]
    fn digest_is_blake3_prefix() {
        let full = blake3::hash(b"abc");
        let expected = u64::from_le_bytes(full.as_bytes()[..8].try_into().unwrap());
        assert_eq!(Blake3Hasher.digest(b"abc"), BlockDigest(expected));
    }

    #[test]
    fn display_is_fixed_width_hex() {
        assert_eq!(BlockDigest(0xab).to_string(), "00000000000000ab");
    }

    proptest! {
        #[test]
        fn prop_digest_deterministic(data in prop::collection::vec(0u8..=255, 0..10_000)) {
            prop_assert_eq!(blake3_digest(&data), Blake3Hasher.digest(&data));
        }
    }
}
