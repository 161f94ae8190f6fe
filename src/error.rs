//! Error types for the tiered cache

use std::sync::Arc;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error returned by caller-supplied computations
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur in the tiered cache
///
/// `Clone` so that a single coalesced outcome can be handed to every waiter.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Key is absent in the consulted tier
    #[error("cache: key is missing")]
    CacheMiss,

    /// Configuration error (e.g. neither tier configured)
    #[error("Configuration error: {0}")]
    Config(String),

    // =========================================================================
    // Codec Errors
    // =========================================================================
    /// Structured serialization failed
    #[error("Encode failed: {0}")]
    Encode(String),

    /// Structured deserialization failed
    #[error("Decode failed: {0}")]
    Decode(String),

    /// Envelope trailer byte is not a known compression method
    #[error("Unknown compression method: {0:#04x}")]
    UnknownCompression(u8),

    /// Compression failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    /// Caller-supplied computation failed
    #[error("Compute failed: {0}")]
    Compute(Arc<dyn std::error::Error + Send + Sync + 'static>),

    /// Remote store transport or protocol failure
    #[error("Remote store error: {0}")]
    Remote(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap a computation failure
    pub fn compute(err: impl Into<BoxError>) -> Self {
        Error::Compute(Arc::from(err.into()))
    }

    /// True for the distinguished miss condition
    pub fn is_cache_miss(&self) -> bool {
        matches!(self, Error::CacheMiss)
    }

    /// True when stored bytes could not be turned back into a value
    pub fn is_decode_failure(&self) -> bool {
        matches!(
            self,
            Error::Decode(_) | Error::UnknownCompression(_) | Error::DecompressionFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::CacheMiss.is_cache_miss());
        assert!(!Error::Remote("down".into()).is_cache_miss());

        assert!(Error::Decode("bad".into()).is_decode_failure());
        assert!(Error::UnknownCompression(0x7f).is_decode_failure());
        assert!(Error::DecompressionFailed {
            algorithm: "LZ4".into(),
            reason: "truncated".into(),
        }
        .is_decode_failure());
        assert!(!Error::Encode("cyclic".into()).is_decode_failure());
        assert!(!Error::CacheMiss.is_decode_failure());
    }

    #[test]
    fn test_compute_error_is_shared_between_clones() {
        let err = Error::compute(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "eof",
        ));
        let clone = err.clone();

        match (&err, &clone) {
            (Error::Compute(a), Error::Compute(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => panic!("expected compute errors"),
        }
        assert_eq!(err.to_string(), "Compute failed: eof");
    }

    #[test]
    fn test_unknown_compression_display() {
        assert_eq!(
            Error::UnknownCompression(0x2a).to_string(),
            "Unknown compression method: 0x2a"
        );
    }
}
