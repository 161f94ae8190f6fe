//! Local tier capability
//!
//! Any in-process key -> bytes store can back the local tier. Implementations
//! must be cheap and non-blocking: the orchestrator calls them inline, never
//! across an await point.

use bytes::Bytes;

/// In-process cache tier.
///
/// The only ordering promise across implementations: a `get` right after a
/// `set` of the same key returns that value, unless it was evicted or expired
/// in between.
pub trait LocalCache: Send + Sync {
    /// Insert or replace a value
    fn set(&self, key: &str, value: Bytes);

    /// Look up a value
    fn get(&self, key: &str) -> Option<Bytes>;

    /// Remove a value, ignoring absent keys
    fn delete(&self, key: &str);
}
