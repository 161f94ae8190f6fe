//! tiercache - Two-Tier Cache with Request Coalescing
//!
//! A cache-aside library that keeps hot values in a bounded in-process tier,
//! shares them through a remote key/value store, and guarantees that at most
//! one computation per key runs at a time.
//!
//! # Architecture
//!
//! ```text
//! caller ──▶ Cache ──▶ Local tier (LRU) ──▶ Remote tier (Redis, ...) ──▶ compute
//!              │
//!              └─ Coalescer: concurrent misses on one key share one computation
//! ```
//!
//! # Example
//!
//! ```
//! use tiercache::cache::{Cache, Item};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let cache = Cache::in_memory();
//!
//! let item = Item::new("user:42").compute(|| async { Ok::<_, tiercache::Error>(42u64) });
//! assert_eq!(cache.once(&item).await.unwrap(), 42);
//! assert_eq!(cache.get::<u64>("user:42").await.unwrap(), 42);
//! # }
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Tiers, envelope codec, coalescer and the [`cache::Cache`] surface
//! - [`error`] - Error types

pub mod cache;
pub mod error;

// Re-export commonly used types
pub use bytes::Bytes;
pub use cache::{Cache, CacheConfig, CacheValue, Item, LruCache, RemoteStore};
pub use error::{Error, Result};
