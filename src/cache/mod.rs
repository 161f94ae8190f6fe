//! Two-Tier Cache with Request Coalescing
//!
//! Cache-aside caching over a bounded in-process tier and a shared remote
//! key/value store.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                             Cache                                    │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  Coalescer (per key)   │  Codec (envelope)    │  CacheStats          │
//! │  one computation in    │  raw │ msgpack + lz4 │  remote hits/misses  │
//! │  flight per key        │  + trailer byte      │                      │
//! ├────────────────────────┴──────────┬───────────┴──────────────────────┤
//! │  Local tier (LocalCache)          │  Remote tier (RemoteStore)       │
//! │  ┌─────────────────────────┐      │  ┌────────────────────────────┐  │
//! │  │ LruCache                │      │  │ Redis / Memcached / ...    │  │
//! │  │ bounded, lazy expiry    │      │  │ TTL, SET XX / SET NX       │  │
//! │  └─────────────────────────┘      │  └────────────────────────────┘  │
//! └───────────────────────────────────┴──────────────────────────────────┘
//! ```
//!
//! Either tier may be absent, but not both.
//!
//! # Envelope
//!
//! Strings and byte buffers are stored as-is. Everything else is MessagePack
//! followed by one trailer byte naming the compression applied to it:
//!
//! - `0x00` - stored uncompressed
//! - `0x01` - LZ4 block (payloads of [`COMPRESSION_THRESHOLD`] bytes or more)

mod coalesce;
mod codec;
mod item;
mod local;
mod lru;
mod orchestrator;
mod remote;
mod stats;
pub mod compression;

pub use coalesce::{Coalesced, Coalescer};
pub use codec::{CacheValue, Codec, CodecConfig, Packed};
pub use compression::{CompressionAlgorithm, Compressor, Lz4Compressor};
pub use item::{ComputeFn, Item, SetCondition, Ttl};
pub use local::LocalCache;
pub use lru::{LruCache, LruConfig, LruStats};
pub use orchestrator::{Cache, CacheBuilder, CacheConfig};
pub use remote::{InMemoryRemoteStore, RemoteStore, RemoteStoreStats};
pub use stats::{CacheStats, Stats};

use std::time::Duration;

/// Structured payloads at least this large are compressed
pub const COMPRESSION_THRESHOLD: usize = 64;

/// TTL applied when an item does not ask for one
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Requested TTLs shorter than this are replaced by the default
pub const MIN_TTL: Duration = Duration::from_secs(1);

/// Default local-tier entry lifetime
pub const DEFAULT_LOCAL_TTL: Duration = Duration::from_secs(60);

/// Default local-tier capacity (entries)
pub const DEFAULT_LOCAL_CAPACITY: usize = 10_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(COMPRESSION_THRESHOLD, 64);
        assert!(MIN_TTL < DEFAULT_LOCAL_TTL);
        assert!(DEFAULT_LOCAL_TTL < DEFAULT_TTL);
    }

    #[test]
    fn test_defaults_wire_through() {
        let config = CacheConfig::default();
        assert_eq!(config.default_ttl, DEFAULT_TTL);
        assert_eq!(config.min_ttl, MIN_TTL);
        assert_eq!(config.codec.compression_threshold, COMPRESSION_THRESHOLD);

        let lru = LruConfig::default();
        assert_eq!(lru.capacity, DEFAULT_LOCAL_CAPACITY);
        assert_eq!(lru.expiry, Some(DEFAULT_LOCAL_TTL));
    }
}
