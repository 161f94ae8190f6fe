//! Remote Tier - Shared Key/Value Store
//!
//! The remote tier is any network key/value service with TTL-aware writes
//! (Redis, Memcached, ...). The cache only needs the handful of operations in
//! [`RemoteStore`]; the client itself lives outside this crate.
//!
//! [`InMemoryRemoteStore`] is a process-local stand-in used by tests and the
//! demo binary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::error::Result;

/// Remote store capability
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Get a value; `Ok(None)` is a miss, never an error
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Unconditionally store a value with a TTL
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;

    /// Store only if the key already exists
    async fn set_if_exists(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;

    /// Store only if the key does not exist
    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;

    /// Delete keys, returning how many were removed
    async fn delete(&self, keys: &[&str]) -> Result<u64>;
}

/// Remote store statistics
#[derive(Debug, Clone, Default)]
pub struct RemoteStoreStats {
    /// Live + not-yet-purged objects
    pub object_count: u64,
    /// Read operations
    pub reads: u64,
    /// Write operations (conditional writes that were skipped included)
    pub writes: u64,
    /// Delete operations
    pub deletes: u64,
}

struct StoredValue {
    data: Bytes,
    /// `None` when the TTL reaches past the clock's range
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

fn deadline(now: Instant, ttl: Duration) -> Option<Instant> {
    now.checked_add(ttl)
}

/// In-memory remote store for testing
/// Uses DashMap for sharded concurrent access
#[derive(Default)]
pub struct InMemoryRemoteStore {
    storage: DashMap<String, StoredValue>,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl InMemoryRemoteStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self, key: &str, value: Bytes, ttl: Duration, now: Instant) {
        self.storage.insert(
            key.to_string(),
            StoredValue {
                data: value,
                expires_at: deadline(now, ttl),
            },
        );
    }

    /// Get statistics
    pub fn stats(&self) -> RemoteStoreStats {
        RemoteStoreStats {
            object_count: self.storage.len() as u64,
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();

        // Expired values are purged on read
        let removed = self.storage.remove_if(key, |_, v| !v.is_live(now));
        if removed.is_some() {
            return Ok(None);
        }

        Ok(self.storage.get(key).map(|v| v.data.clone()))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.store(key, value, ttl, Instant::now());
        Ok(())
    }

    async fn set_if_exists(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();

        if let Some(mut entry) = self.storage.get_mut(key) {
            if entry.is_live(now) {
                entry.data = value;
                entry.expires_at = deadline(now, ttl);
            }
        }
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();

        let fresh = StoredValue {
            data: value,
            expires_at: deadline(now, ttl),
        };
        match self.storage.entry(key.to_string()) {
            Entry::Occupied(mut entry) if !entry.get().is_live(now) => {
                entry.insert(fresh);
            }
            Entry::Occupied(_) => {}
            Entry::Vacant(entry) => {
                entry.insert(fresh);
            }
        }
        Ok(())
    }

    async fn delete(&self, keys: &[&str]) -> Result<u64> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();

        let mut deleted = 0;
        for key in keys {
            if let Some((_, value)) = self.storage.remove(*key) {
                if value.is_live(now) {
                    deleted += 1;
                }
            }
        }
        Ok(deleted)
    }
}

// =============================================================================
// Tests
// =============================================================================
