//! Byte Envelope Codec
//!
//! Turns cached values into the byte envelope shared by both tiers:
//!
//! ```text
//! raw values (String, Vec<u8>, Bytes):   [ bytes ........................ ]
//! structured values:                      [ msgpack payload (maybe LZ4) | trailer ]
//! ```
//!
//! The trailer is a single byte naming the [`CompressionAlgorithm`]. Payloads
//! shorter than the compression threshold are never compressed.
//!
//! Which path a value takes is decided statically by its [`CacheValue`]
//! implementation, so raw values never pass through the trailer logic.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::compression::{CompressionAlgorithm, Compressor, Lz4Compressor};
use super::COMPRESSION_THRESHOLD;
use crate::error::{Error, Result};

/// MessagePack encoding of `nil`, used for empty envelopes
const MSGPACK_NIL: [u8; 1] = [0xc0];

// =============================================================================
// Configuration
// =============================================================================

/// Codec configuration
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// Payloads at or above this size are compressed
    pub compression_threshold: usize,
    /// Algorithm used for payloads above the threshold
    pub algorithm: CompressionAlgorithm,
    /// Compression level (algorithm-specific)
    pub level: i32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            compression_threshold: COMPRESSION_THRESHOLD,
            algorithm: CompressionAlgorithm::Lz4,
            level: 4,
        }
    }
}

// =============================================================================
// Value Capability
// =============================================================================

/// A type that can be stored in the cache.
///
/// Raw impls exist for `String`, `Vec<u8>` and [`Bytes`]; primitives and
/// [`Packed`] go through the structured path. Opt your own serde types in
/// with [`cache_value!`](crate::cache_value).
pub trait CacheValue: Sized + Send + 'static {
    /// Encode into envelope bytes
    fn encode(&self, codec: &Codec) -> Result<Bytes>;

    /// Decode from envelope bytes
    fn decode(bytes: &[u8], codec: &Codec) -> Result<Self>;
}

impl CacheValue for String {
    fn encode(&self, _codec: &Codec) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(self.as_bytes()))
    }

    fn decode(bytes: &[u8], _codec: &Codec) -> Result<Self> {
        String::from_utf8(bytes.to_vec()).map_err(|e| Error::Decode(e.to_string()))
    }
}

impl CacheValue for Vec<u8> {
    fn encode(&self, _codec: &Codec) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(self))
    }

    fn decode(bytes: &[u8], _codec: &Codec) -> Result<Self> {
        Ok(bytes.to_vec())
    }
}

impl CacheValue for Bytes {
    fn encode(&self, _codec: &Codec) -> Result<Bytes> {
        Ok(self.clone())
    }

    fn decode(bytes: &[u8], _codec: &Codec) -> Result<Self> {
        Ok(Bytes::copy_from_slice(bytes))
    }
}

/// Structured wrapper for any serde type.
///
/// ```
/// use tiercache::cache::{Codec, CacheValue, Packed};
///
/// let codec = Codec::default();
/// let bytes = Packed(vec![1u32, 2, 3]).encode(&codec).unwrap();
/// let back = Packed::<Vec<u32>>::decode(&bytes, &codec).unwrap();
/// assert_eq!(back.into_inner(), vec![1, 2, 3]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Packed<T>(pub T);

impl<T> Packed<T> {
    /// Unwrap the inner value
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> CacheValue for Packed<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn encode(&self, codec: &Codec) -> Result<Bytes> {
        codec.pack(&self.0)
    }

    fn decode(bytes: &[u8], codec: &Codec) -> Result<Self> {
        codec.unpack(bytes).map(Packed)
    }
}

/// Implement [`CacheValue`](crate::cache::CacheValue) for serde types using
/// the structured envelope.
///
/// ```
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Profile {
///     name: String,
/// }
///
/// tiercache::cache_value!(Profile);
/// ```
#[macro_export]
macro_rules! cache_value {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::cache::CacheValue for $ty {
                fn encode(&self, codec: &$crate::cache::Codec) -> $crate::Result<$crate::Bytes> {
                    codec.pack(self)
                }

                fn decode(bytes: &[u8], codec: &$crate::cache::Codec) -> $crate::Result<Self> {
                    codec.unpack(bytes)
                }
            }
        )+
    };
}

cache_value!(bool, char, u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, f32, f64);

// =============================================================================
// Codec
// =============================================================================

/// Envelope encoder/decoder
pub struct Codec {
    config: CodecConfig,
    lz4: Lz4Compressor,
}

impl Codec {
    /// Create a codec with custom config
    pub fn with_config(config: CodecConfig) -> Self {
        Self {
            lz4: Lz4Compressor::with_level(config.level),
            config,
        }
    }

    /// Encode a value into envelope bytes
    pub fn encode<T: CacheValue>(&self, value: &T) -> Result<Bytes> {
        value.encode(self)
    }

    /// Decode envelope bytes into a value
    pub fn decode<T: CacheValue>(&self, bytes: &[u8]) -> Result<T> {
        T::decode(bytes, self)
    }

    /// Structured encode: MessagePack payload, optional compression, trailer
    pub fn pack<T: Serialize + ?Sized>(&self, value: &T) -> Result<Bytes> {
        let mut payload =
            rmp_serde::to_vec_named(value).map_err(|e| Error::Encode(e.to_string()))?;

        if payload.len() < self.config.compression_threshold
            || self.config.algorithm == CompressionAlgorithm::None
        {
            payload.push(CompressionAlgorithm::None.trailer());
            return Ok(Bytes::from(payload));
        }

        match self.lz4.compress(&payload) {
            // Only use compressed if it's actually smaller
            Ok(mut compressed) if compressed.len() < payload.len() => {
                compressed.push(self.config.algorithm.trailer());
                Ok(Bytes::from(compressed))
            }
            Ok(_) => {
                payload.push(CompressionAlgorithm::None.trailer());
                Ok(Bytes::from(payload))
            }
            Err(e) => {
                tracing::warn!("Compression failed, using uncompressed: {}", e);
                payload.push(CompressionAlgorithm::None.trailer());
                Ok(Bytes::from(payload))
            }
        }
    }

    /// Structured decode: strip trailer, decompress if flagged, deserialize.
    ///
    /// An empty envelope decodes as MessagePack `nil`.
    pub fn unpack<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        let Some((&trailer, payload)) = bytes.split_last() else {
            return rmp_serde::from_slice(&MSGPACK_NIL).map_err(|e| Error::Decode(e.to_string()));
        };

        let algorithm = CompressionAlgorithm::from_trailer(trailer)?;
        let result = match algorithm {
            CompressionAlgorithm::None => rmp_serde::from_slice(payload),
            CompressionAlgorithm::Lz4 => {
                let decompressed = self.lz4.decompress(payload)?;
                rmp_serde::from_slice(&decompressed)
            }
        };
        result.map_err(|e| Error::Decode(e.to_string()))
    }

    /// Get configuration
    pub fn config(&self) -> &CodecConfig {
        &self.config
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::with_config(CodecConfig::default())
    }
}
