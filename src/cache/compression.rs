//! Envelope Compression
//!
//! LZ4 block compression for structured payloads, selected per value and
//! recorded in the envelope's trailing byte.
//!
//! # Example
//!
//! ```
//! use tiercache::cache::compression::{CompressionAlgorithm, Compressor, Lz4Compressor};
//!
//! let lz4 = Lz4Compressor::new();
//!
//! let data = b"Hello, this is test data that should compress well! Hello, this is test data.";
//! let compressed = lz4.compress(data).unwrap();
//!
//! let decompressed = lz4.decompress(&compressed).unwrap();
//! assert_eq!(decompressed, data);
//! assert_eq!(CompressionAlgorithm::from_trailer(0x01).unwrap(), CompressionAlgorithm::Lz4);
//! ```

use crate::error::{Error, Result};

// =============================================================================
// Compression Algorithm
// =============================================================================

/// Compression methods an envelope trailer can name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionAlgorithm {
    /// Payload stored as-is
    None,
    /// LZ4 block with a 4-byte uncompressed-length prefix
    #[default]
    Lz4,
}

impl CompressionAlgorithm {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Lz4 => "lz4",
        }
    }

    /// Trailer byte written after the payload
    pub fn trailer(&self) -> u8 {
        match self {
            CompressionAlgorithm::None => 0x00,
            CompressionAlgorithm::Lz4 => 0x01,
        }
    }

    /// Parse a trailer byte; unknown values are corrupt or foreign data
    pub fn from_trailer(byte: u8) -> Result<Self> {
        match byte {
            0x00 => Ok(CompressionAlgorithm::None),
            0x01 => Ok(CompressionAlgorithm::Lz4),
            other => Err(Error::UnknownCompression(other)),
        }
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Compressor Trait
// =============================================================================

/// Trait for compression implementations
pub trait Compressor: Send + Sync {
    /// Compress data
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress data
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// LZ4 block compressor
pub struct Lz4Compressor {
    level: i32,
}

impl Lz4Compressor {
    /// Create new LZ4 compressor with default settings
    pub fn new() -> Self {
        Self { level: 4 }
    }

    /// Create with custom compression level
    pub fn with_level(level: i32) -> Self {
        Self { level }
    }
}

impl Default for Lz4Compressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for Lz4Compressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::compress(
            data,
            Some(lz4::block::CompressionMode::HIGHCOMPRESSION(self.level)),
            true,
        )
        .map_err(|e| Error::CompressionFailed {
            algorithm: "LZ4".into(),
            reason: e.to_string(),
        })
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::decompress(data, None).map_err(|e| Error::DecompressionFailed {
            algorithm: "LZ4".into(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_DATA: &[u8] = b"Hello, this is test data that should compress well. \
        It has some repetition: Hello, this is test data that should compress well.";

    #[test]
    fn test_lz4_roundtrip() {
        let compressor = Lz4Compressor::new();

        let compressed = compressor.compress(TEST_DATA).unwrap();
        assert!(compressed.len() < TEST_DATA.len());

        let decompressed = compressor.decompress(&compressed).unwrap();
        assert_eq!(decompressed, TEST_DATA);
    }

    #[test]
    fn test_lz4_rejects_garbage() {
        let compressor = Lz4Compressor::new();

        // Length prefix claims 16 bytes but the block is malformed
        let garbage = [16u8, 0, 0, 0, 0xff, 0xff, 0xff];
        let err = compressor.decompress(&garbage).unwrap_err();
        assert!(err.is_decode_failure());
    }

    #[test]
    fn test_trailer_mapping() {
        for alg in [CompressionAlgorithm::None, CompressionAlgorithm::Lz4] {
            assert_eq!(CompressionAlgorithm::from_trailer(alg.trailer()).unwrap(), alg);
        }
        assert!(matches!(
            CompressionAlgorithm::from_trailer(0x02),
            Err(Error::UnknownCompression(0x02))
        ));
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!(CompressionAlgorithm::None.name(), "none");
        assert_eq!(CompressionAlgorithm::Lz4.to_string(), "lz4");
        assert_eq!(CompressionAlgorithm::default(), CompressionAlgorithm::Lz4);
    }
}
