//! LZ4 and Zstd compression/decompression of image sections

use crate::error::ReduceError;
use serde::{Deserialize, Serialize};

/// Zstd level used when an image says "zstd" and no level is known.
pub const DEFAULT_ZSTD_LEVEL: i32 = 9;

/// Compression algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CompressionAlgorithm {
    /// No compression (passthrough)
    None,
    /// LZ4 block format with a prepended length; fast, modest ratio
    #[default]
    Lz4,
    /// Zstandard; the level is the compression effort
    Zstd {
        /// Compression level (1=fastest, 22=best ratio)
        level: i32,
    },
}

impl CompressionAlgorithm {
    /// One-byte code stored in the superblock.
    pub fn code(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Lz4 => 1,
            Self::Zstd { .. } => 2,
        }
    }

    /// Algorithm for a superblock code. The zstd level only matters when
    /// compressing, so the default one is filled in.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::Lz4),
            2 => Some(Self::Zstd {
                level: DEFAULT_ZSTD_LEVEL,
            }),
            _ => None,
        }
    }

    /// Short name for reports.
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Lz4 => "lz4",
            Self::Zstd { .. } => "zstd",
        }
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Zstd { level } => write!(f, "zstd (level {})", level),
            other => f.write_str(other.name()),
        }
    }
}

/// Compress data with the given algorithm. Returns compressed bytes.
pub fn compress(data: &[u8], algo: CompressionAlgorithm) -> Result<Vec<u8>, ReduceError> {
    match algo {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        CompressionAlgorithm::Zstd { level } => {
            zstd::encode_all(data, level).map_err(|e| ReduceError::CompressionFailed(e.to_string()))
        }
    }
}

/// Decompress data that is known to expand to at most `max_len` bytes.
///
/// The bound is checked before allocating, so a corrupted length prefix
/// cannot trigger a huge allocation.
pub fn decompress(
    data: &[u8],
    algo: CompressionAlgorithm,
    max_len: usize,
) -> Result<Vec<u8>, ReduceError> {
    match algo {
        CompressionAlgorithm::None => {
            if data.len() > max_len {
                return Err(ReduceError::DecompressionFailed(format!(
                    "stored length {} exceeds limit {}",
                    data.len(),
                    max_len
                )));
            }
            Ok(data.to_vec())
        }
        CompressionAlgorithm::Lz4 => {
            if data.len() < 4 {
                return Err(ReduceError::DecompressionFailed(
                    "lz4 payload shorter than its length prefix".to_string(),
                ));
            }
            let (prefix, body) = data.split_at(4);
            let size = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
            if size > max_len {
                return Err(ReduceError::DecompressionFailed(format!(
                    "declared length {} exceeds limit {}",
                    size, max_len
                )));
            }
            let out = lz4_flex::decompress(body, size)
                .map_err(|e| ReduceError::DecompressionFailed(e.to_string()))?;
            if out.len() != size {
                return Err(ReduceError::DecompressionFailed(format!(
                    "expected {} bytes, got {}",
                    size,
                    out.len()
                )));
            }
            Ok(out)
        }
        CompressionAlgorithm::Zstd { .. } => zstd::bulk::decompress(data, max_len)
            .map_err(|e| ReduceError::DecompressionFailed(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL: [CompressionAlgorithm; 3] = [
        CompressionAlgorithm::None,
        CompressionAlgorithm::Lz4,
        CompressionAlgorithm::Zstd { level: 3 },
    ];

    proptest! {
        #[test]
        fn prop_lz4_roundtrip(data in prop::collection::vec(0u8..=255, 0..100_000)) {
            let c = compress(&data, CompressionAlgorithm::Lz4).unwrap();
            let d = decompress(&c, CompressionAlgorithm::Lz4, data.len()).unwrap();
            prop_assert_eq!(d, data);
        }
        #[test]
        fn prop_zstd_roundtrip(data in prop::collection::vec(0u8..=255, 0..100_000)) {
            let c = compress(&data, CompressionAlgorithm::Zstd { level: 3 }).unwrap();
            let d = decompress(&c, CompressionAlgorithm::Zstd { level: 3 }, data.len()).unwrap();
            prop_assert_eq!(d, data);
        }
    }

    #[test]
    fn empty_roundtrips() {
        for algo in ALL {
            let c = compress(&[], algo).unwrap();
            let d = decompress(&c, algo, 0).unwrap();
            assert_eq!(d, b"");
        }
    }

    #[test]
    fn codes_roundtrip() {
        for algo in ALL {
            let back = CompressionAlgorithm::from_code(algo.code()).unwrap();
            assert_eq!(back.code(), algo.code());
        }
        assert_eq!(CompressionAlgorithm::from_code(7), None);
    }

    #[test]
    fn limit_is_enforced() {
        let data = vec![7u8; 4096];
        for algo in ALL {
            let c = compress(&data, algo).unwrap();
            assert!(decompress(&c, algo, 4095).is_err(), "{} accepted oversize", algo);
        }
    }

    #[test]
    fn garbage_fails_to_decompress() {
        let garbage = vec![0xFFu8; 64];
        assert!(decompress(&garbage, CompressionAlgorithm::Lz4, 1 << 20).is_err());
        assert!(decompress(&garbage, CompressionAlgorithm::Zstd { level: 3 }, 1 << 20).is_err());
    }
}
