//! Cache Orchestrator - Unified Two-Tier Cache
//!
//! Coordinates the local tier, the remote store and the request coalescer.
//!
//! # Read path
//!
//! ```text
//! get(key) ──▶ local hit? ──yes──▶ decode
//!                  │no
//!                  ▼
//!              remote hit? ──yes──▶ promote to local ──▶ decode
//!                  │no
//!                  ▼
//!              CacheMiss
//! ```
//!
//! # Compute-once path
//!
//! `once` adds a coalesced step between "remote miss" and "CacheMiss": the
//! first caller for a key computes, encodes and stores the value while every
//! concurrent caller for that key waits for the same bytes. A cached entry
//! that no longer decodes into the requested type is purged and the whole
//! operation retried once.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use super::codec::{CacheValue, Codec, CodecConfig};
use super::coalesce::Coalescer;
use super::item::{Item, SetCondition, Ttl};
use super::local::LocalCache;
use super::lru::LruCache;
use super::remote::{InMemoryRemoteStore, RemoteStore};
use super::stats::{CacheStats, Stats};
use super::{DEFAULT_TTL, MIN_TTL};
use crate::error::{Error, Result};

const NO_TIERS: &str = "neither a local cache nor a remote store is configured";

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL for items that do not request one
    pub default_ttl: Duration,
    /// Requested TTLs below this are replaced by `default_ttl`
    pub min_ttl: Duration,
    /// Envelope codec configuration
    pub codec: CodecConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL,
            min_ttl: MIN_TTL,
            codec: CodecConfig::default(),
        }
    }
}

/// Bytes produced by one coalesced lookup-or-compute
#[derive(Debug, Clone)]
struct Fetched {
    bytes: Bytes,
    /// True if the bytes came from an existing entry rather than a fresh computation
    cached: bool,
}

struct CacheInner {
    local: Option<Arc<dyn LocalCache>>,
    remote: Option<Arc<dyn RemoteStore>>,
    codec: Codec,
    group: Arc<Coalescer<Fetched>>,
    stats: CacheStats,
    config: CacheConfig,
}

impl CacheInner {
    fn check_tiers(&self) -> Result<()> {
        if self.local.is_none() && self.remote.is_none() {
            return Err(Error::Config(NO_TIERS.into()));
        }
        Ok(())
    }

    /// Local tier, then remote tier (promoting hits into local)
    async fn get_bytes(&self, key: &str, skip_local: bool) -> Result<Bytes> {
        self.check_tiers()?;

        let local = self.local.as_ref().filter(|_| !skip_local);
        if let Some(bytes) = local.and_then(|local| local.get(key)) {
            return Ok(bytes);
        }

        let Some(remote) = &self.remote else {
            return Err(Error::CacheMiss);
        };

        match remote.get(key).await {
            Ok(Some(bytes)) => {
                self.stats.record_hit();
                if let Some(local) = local {
                    local.set(key, bytes.clone());
                }
                Ok(bytes)
            }
            Ok(None) => {
                self.stats.record_miss();
                Err(Error::CacheMiss)
            }
            Err(e) => {
                self.stats.record_miss();
                Err(e)
            }
        }
    }

    /// Write encoded bytes to the local tier and, unless local-only, the remote store
    async fn set_bytes(
        &self,
        key: &str,
        bytes: Bytes,
        ttl: Ttl,
        condition: SetCondition,
        skip_local: bool,
    ) -> Result<()> {
        self.check_tiers()?;

        if let Some(local) = self.local.as_ref().filter(|_| !skip_local) {
            local.set(key, bytes.clone());
        }

        let Some(remote) = &self.remote else {
            return Ok(());
        };

        let Some(ttl) = ttl.resolve(self.config.default_ttl, self.config.min_ttl) else {
            debug!(key, "local-only item, skipping remote write");
            return Ok(());
        };

        match condition {
            SetCondition::Always => remote.set(key, bytes, ttl).await,
            SetCondition::IfExists => remote.set_if_exists(key, bytes, ttl).await,
            SetCondition::IfAbsent => remote.set_if_absent(key, bytes, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_tiers()?;

        if let Some(local) = &self.local {
            local.delete(key);
        }

        let Some(remote) = &self.remote else {
            return Ok(());
        };

        match remote.delete(&[key]).await? {
            0 => Err(Error::CacheMiss),
            _ => Ok(()),
        }
    }
}

/// Two-tier cache handle.
///
/// Cheap to clone; clones share tiers, coalescer and counters. Independent
/// `Cache` instances never interact.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<CacheInner>,
}

impl Cache {
    /// Create a cache over the given tiers
    pub fn new(
        config: CacheConfig,
        local: Option<Arc<dyn LocalCache>>,
        remote: Option<Arc<dyn RemoteStore>>,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                local,
                remote,
                codec: Codec::with_config(config.codec.clone()),
                group: Arc::new(Coalescer::new()),
                stats: CacheStats::new(),
                config,
            }),
        }
    }

    /// Start building a cache
    pub fn builder() -> CacheBuilder {
        CacheBuilder::default()
    }

    /// Default LRU local tier over an in-memory remote store (for testing)
    pub fn in_memory() -> Self {
        Self::builder()
            .local(Arc::new(LruCache::default()))
            .remote(Arc::new(InMemoryRemoteStore::new()))
            .build()
    }

    /// Store an item in both tiers.
    ///
    /// The value comes from `Item::value`, else `Item::compute`, else is
    /// stored as an empty (nil) envelope.
    pub async fn set<T: CacheValue>(&self, item: &Item<T>) -> Result<()> {
        self.inner.check_tiers()?;

        let bytes = self.resolve_bytes(item).await?;
        self.inner
            .set_bytes(
                &item.key,
                bytes,
                item.ttl,
                item.condition,
                item.skip_local_cache,
            )
            .await
    }

    /// Get the value for `key`
    pub async fn get<T: CacheValue>(&self, key: &str) -> Result<T> {
        let bytes = self.inner.get_bytes(key, false).await?;
        self.inner.codec.decode(&bytes)
    }

    /// Get the value for `key` from the remote store, neither reading nor
    /// populating the local tier
    pub async fn get_skipping_local_cache<T: CacheValue>(&self, key: &str) -> Result<T> {
        let bytes = self.inner.get_bytes(key, true).await?;
        self.inner.codec.decode(&bytes)
    }

    /// Report whether a value exists for `key` (without decoding it)
    pub async fn exists(&self, key: &str) -> bool {
        self.inner.get_bytes(key, false).await.is_ok()
    }

    /// Get the value for `item.key`, or compute, cache and return it.
    ///
    /// Only one computation per key is in flight at a time; concurrent
    /// callers for the same key wait for it and receive the same outcome. A
    /// failed computation is never cached. If an existing entry cannot be
    /// decoded as `T` it is deleted from both tiers and the operation is
    /// retried exactly once.
    pub async fn once<T: CacheValue>(&self, item: &Item<T>) -> Result<T> {
        self.inner.check_tiers()?;

        let mut retried = false;
        loop {
            let fetched = self.fetch_once(item).await?;

            match self.inner.codec.decode::<T>(&fetched.bytes) {
                Ok(value) => return Ok(value),
                Err(e) if fetched.cached && !retried => {
                    warn!(key = item.key(), error = %e, "cached entry failed to decode, purging");
                    // Best effort: a miss here just means someone beat us to it
                    let _ = self.inner.delete(item.key()).await;
                    retried = true;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Local fast path, then the coalesced remote-lookup-or-compute
    async fn fetch_once<T: CacheValue>(&self, item: &Item<T>) -> Result<Fetched> {
        if !item.skip_local_cache {
            if let Some(bytes) = self.inner.local.as_ref().and_then(|l| l.get(&item.key)) {
                return Ok(Fetched {
                    bytes,
                    cached: true,
                });
            }
        }

        let preset = item
            .value
            .as_ref()
            .map(|value| self.inner.codec.encode(value))
            .transpose()?;
        let inner = Arc::clone(&self.inner);
        let key = item.key.clone();
        let compute = item.compute.clone();
        let (ttl, condition, skip_local) = (item.ttl, item.condition, item.skip_local_cache);

        let outcome = self
            .inner
            .group
            .run(&item.key, move || async move {
                match inner.get_bytes(&key, skip_local).await {
                    Ok(bytes) => return Ok(Fetched { bytes, cached: true }),
                    Err(Error::CacheMiss) => {}
                    Err(e) => warn!(key = %key, error = %e, "cache lookup failed, computing"),
                }

                let bytes = match (preset, compute) {
                    (Some(bytes), _) => bytes,
                    (None, Some(compute)) => {
                        let value = compute().await.map_err(Error::compute)?;
                        inner.codec.encode(&value)?
                    }
                    (None, None) => Bytes::new(),
                };

                inner
                    .set_bytes(&key, bytes.clone(), ttl, condition, skip_local)
                    .await?;
                Ok(Fetched {
                    bytes,
                    cached: false,
                })
            })
            .await?;

        if outcome.shared {
            debug!(key = item.key(), "served by coalesced call");
        }
        Ok(outcome.value)
    }

    /// Encode the item's value, running its computation if needed
    async fn resolve_bytes<T: CacheValue>(&self, item: &Item<T>) -> Result<Bytes> {
        if let Some(value) = &item.value {
            return self.inner.codec.encode(value);
        }
        match &item.compute {
            Some(compute) => {
                let value = compute().await.map_err(Error::compute)?;
                self.inner.codec.encode(&value)
            }
            None => Ok(Bytes::new()),
        }
    }

    /// Delete `key` from both tiers.
    ///
    /// Returns `CacheMiss` if the remote store had nothing to delete.
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }

    /// Remote-tier hit/miss counters
    pub fn stats(&self) -> Stats {
        self.inner.stats.snapshot()
    }

    /// Number of keys with a coalesced call in flight
    pub fn in_flight(&self) -> usize {
        self.inner.group.in_flight()
    }

    /// Get the codec
    pub fn codec(&self) -> &Codec {
        &self.inner.codec
    }

    /// Get configuration
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Get the local tier, if configured
    pub fn local(&self) -> Option<&Arc<dyn LocalCache>> {
        self.inner.local.as_ref()
    }

    /// Get the remote tier, if configured
    pub fn remote(&self) -> Option<&Arc<dyn RemoteStore>> {
        self.inner.remote.as_ref()
    }
}

/// Builder for [`Cache`]
#[derive(Default)]
pub struct CacheBuilder {
    config: CacheConfig,
    local: Option<Arc<dyn LocalCache>>,
    remote: Option<Arc<dyn RemoteStore>>,
}

impl CacheBuilder {
    /// Set configuration
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the local tier
    pub fn local(mut self, local: Arc<dyn LocalCache>) -> Self {
        self.local = Some(local);
        self
    }

    /// Set the remote tier
    pub fn remote(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Build the cache
    pub fn build(self) -> Cache {
        Cache::new(self.config, self.local, self.remote)
    }
}

// =============================================================================
// Tests
// =============================================================================
