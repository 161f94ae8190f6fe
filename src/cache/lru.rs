//! LRU Cache - Reference Local Tier
//!
//! Bounded least-recently-used cache with optional lazy expiry.
//!
//! # Design
//!
//! - Hash index (key -> slot) plus an intrusive doubly linked list threaded
//!   through a slab of nodes; every operation is O(1)
//! - One `parking_lot::Mutex` around index + list, held only for the
//!   structural update
//! - Expiry is lazy: a stale entry is dropped when it is read, never swept
//!
//! ```text
//!   head (most recent)                                tail (least recent)
//!      │                                                     │
//!      ▼                                                     ▼
//!   [slot 3] ◀──▶ [slot 0] ◀──▶ [slot 5] ◀──▶ ... ◀──▶ [slot 1]
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use super::local::LocalCache;
use super::{DEFAULT_LOCAL_CAPACITY, DEFAULT_LOCAL_TTL};

/// Sentinel for "no neighbour"
const NIL: usize = usize::MAX;

/// LRU configuration
#[derive(Debug, Clone)]
pub struct LruConfig {
    /// Maximum number of entries
    pub capacity: usize,
    /// Entries older than this are treated as absent (`None` = never expire)
    pub expiry: Option<Duration>,
}

impl Default for LruConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_LOCAL_CAPACITY,
            expiry: Some(DEFAULT_LOCAL_TTL),
        }
    }
}

struct Node {
    key: String,
    value: Bytes,
    /// Insertion or last `set` time
    touched_at: Instant,
    prev: usize,
    next: usize,
}

/// Index + recency list, always accessed under the lock
struct LruState {
    index: HashMap<String, usize>,
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
}

impl LruState {
    fn new(capacity: usize) -> Self {
        Self {
            index: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
        }
    }

    fn node(&self, slot: usize) -> &Node {
        self.slots[slot].as_ref().expect("linked slot is occupied")
    }

    fn node_mut(&mut self, slot: usize) -> &mut Node {
        self.slots[slot].as_mut().expect("linked slot is occupied")
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    /// Unlink a slot from the recency list
    fn detach(&mut self, slot: usize) {
        let (prev, next) = {
            let node = self.node(slot);
            (node.prev, node.next)
        };

        if prev == NIL {
            self.head = next;
        } else {
            self.node_mut(prev).next = next;
        }

        if next == NIL {
            self.tail = prev;
        } else {
            self.node_mut(next).prev = prev;
        }
    }

    /// Link a slot at the most-recently-used end
    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        {
            let node = self.node_mut(slot);
            node.prev = NIL;
            node.next = old_head;
        }

        if old_head == NIL {
            self.tail = slot;
        } else {
            self.node_mut(old_head).prev = slot;
        }
        self.head = slot;
    }

    fn promote(&mut self, slot: usize) {
        if self.head != slot {
            self.detach(slot);
            self.push_front(slot);
        }
    }

    fn insert(&mut self, key: String, value: Bytes, now: Instant) {
        let node = Node {
            key: key.clone(),
            value,
            touched_at: now,
            prev: NIL,
            next: NIL,
        };

        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };

        self.index.insert(key, slot);
        self.push_front(slot);
    }

    fn remove_slot(&mut self, slot: usize) -> Node {
        self.detach(slot);
        let node = self.slots[slot].take().expect("linked slot is occupied");
        self.index.remove(&node.key);
        self.free.push(slot);
        node
    }

    fn pop_back(&mut self) -> Option<Node> {
        match self.tail {
            NIL => None,
            slot => Some(self.remove_slot(slot)),
        }
    }

    fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
        self.free.clear();
        self.head = NIL;
        self.tail = NIL;
    }
}

/// Bounded LRU cache for the local tier
pub struct LruCache {
    state: Mutex<LruState>,
    config: LruConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl LruCache {
    /// Create with the given capacity and the default expiry
    pub fn new(capacity: usize) -> Self {
        Self::with_config(LruConfig {
            capacity,
            ..Default::default()
        })
    }

    /// Create with custom configuration
    pub fn with_config(mut config: LruConfig) -> Self {
        config.capacity = config.capacity.max(1);
        Self {
            state: Mutex::new(LruState::new(config.capacity)),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    fn is_expired(&self, node: &Node, now: Instant) -> bool {
        match self.config.expiry {
            Some(expiry) => now.saturating_duration_since(node.touched_at) > expiry,
            None => false,
        }
    }

    /// Get a value, promoting it to most recently used
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let now = Instant::now();
        let mut state = self.state.lock();

        let Some(&slot) = state.index.get(key) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if self.is_expired(state.node(slot), now) {
            state.remove_slot(slot);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(key, "local entry expired");
            return None;
        }

        state.promote(slot);
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(state.node(slot).value.clone())
    }

    /// Look at a value without promoting it or touching stats
    pub fn peek(&self, key: &str) -> Option<Bytes> {
        let now = Instant::now();
        let state = self.state.lock();
        let slot = *state.index.get(key)?;
        let node = state.node(slot);
        (!self.is_expired(node, now)).then(|| node.value.clone())
    }

    /// Insert or update a value, evicting from the cold end when full
    pub fn set(&self, key: &str, value: Bytes) {
        let now = Instant::now();
        let mut state = self.state.lock();

        if let Some(&slot) = state.index.get(key) {
            let node = state.node_mut(slot);
            node.value = value;
            node.touched_at = now;
            state.promote(slot);
            return;
        }

        state.insert(key.to_string(), value, now);
        while state.len() > self.config.capacity {
            if let Some(evicted) = state.pop_back() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(key = %evicted.key, "local entry evicted");
            }
        }
    }

    /// Remove a value, returning it if present
    pub fn remove(&self, key: &str) -> Option<Bytes> {
        let mut state = self.state.lock();
        let slot = *state.index.get(key)?;
        Some(state.remove_slot(slot).value)
    }

    /// Get number of entries (including expired ones not yet read)
    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get capacity
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Get configured expiry
    pub fn expiry(&self) -> Option<Duration> {
        self.config.expiry
    }

    /// Clear the cache
    pub fn clear(&self) {
        self.state.lock().clear();
    }

    /// Get cache statistics
    pub fn stats(&self) -> LruStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        LruStats {
            entries: self.len(),
            capacity: self.capacity(),
            hits,
            misses,
            hit_ratio: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

impl Default for LruCache {
    fn default() -> Self {
        Self::with_config(LruConfig::default())
    }
}

impl LocalCache for LruCache {
    fn set(&self, key: &str, value: Bytes) {
        LruCache::set(self, key, value)
    }

    fn get(&self, key: &str) -> Option<Bytes> {
        LruCache::get(self, key)
    }

    fn delete(&self, key: &str) {
        self.remove(key);
    }
}

/// LRU cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct LruStats {
    /// Number of entries
    pub entries: usize,
    /// Capacity in entries
    pub capacity: usize,
    /// Hit count
    pub hits: u64,
    /// Miss count (includes expired reads)
    pub misses: u64,
    /// Hit ratio (0.0 - 1.0)
    pub hit_ratio: f64,
    /// Entries dropped to stay within capacity
    pub evictions: u64,
    /// Entries dropped because they were read after expiry
    pub expirations: u64,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn no_expiry(capacity: usize) -> LruCache {
        LruCache::with_config(LruConfig {
            capacity,
            expiry: None,
        })
    }

    fn val(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[test]
    fn test_lru_put_get() {
        let cache = no_expiry(4);

        cache.set("a", val("1"));
        assert_eq!(cache.get("a"), Some(val("1")));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("missing"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_ratio, 0.5);
    }

    #[test]
    fn test_lru_update_replaces_value() {
        let cache = no_expiry(2);

        cache.set("a", val("1"));
        cache.set("a", val("2"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a"), Some(val("2")));
    }

    #[test]
    fn test_lru_evicts_least_recent() {
        let cache = no_expiry(3);

        cache.set("a", val("1"));
        cache.set("b", val("2"));
        cache.set("c", val("3"));
        cache.set("d", val("4"));

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.peek("a"), None);
        assert!(cache.peek("b").is_some());
        assert!(cache.peek("c").is_some());
        assert!(cache.peek("d").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_lru_get_promotes() {
        let cache = no_expiry(3);

        cache.set("a", val("1"));
        cache.set("b", val("2"));
        cache.set("c", val("3"));

        // "a" becomes most recent, so "b" is now the eviction candidate
        assert!(cache.get("a").is_some());
        cache.set("d", val("4"));

        assert!(cache.peek("a").is_some());
        assert_eq!(cache.peek("b"), None);
    }

    #[test]
    fn test_lru_set_promotes_existing() {
        let cache = no_expiry(2);

        cache.set("a", val("1"));
        cache.set("b", val("2"));
        cache.set("a", val("3"));
        cache.set("c", val("4"));

        assert_eq!(cache.peek("a"), Some(val("3")));
        assert_eq!(cache.peek("b"), None);
    }

    #[test]
    fn test_lru_remove() {
        let cache = no_expiry(2);

        cache.set("a", val("1"));
        assert_eq!(cache.remove("a"), Some(val("1")));
        assert_eq!(cache.remove("a"), None);
        assert!(cache.is_empty());

        // Freed slot is reused without disturbing order
        cache.set("b", val("2"));
        cache.set("c", val("3"));
        cache.set("d", val("4"));
        assert_eq!(cache.peek("b"), None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_lru_clear() {
        let cache = no_expiry(8);
        for i in 0..8 {
            cache.set(&format!("k{i}"), val("v"));
        }

        cache.clear();
        assert!(cache.is_empty());
        cache.set("k", val("v"));
        assert_eq!(cache.get("k"), Some(val("v")));
    }

    #[test]
    fn test_lru_zero_capacity_clamped() {
        let cache = no_expiry(0);
        assert_eq!(cache.capacity(), 1);

        cache.set("a", val("1"));
        assert_eq!(cache.get("a"), Some(val("1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_lazy_expiry() {
        let cache = LruCache::with_config(LruConfig {
            capacity: 4,
            expiry: Some(Duration::from_secs(60)),
        });

        cache.set("a", val("1"));
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(cache.get("a"), Some(val("1")));

        tokio::time::advance(Duration::from_secs(31)).await;
        // Still physically present until read
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_set_refreshes_age() {
        let cache = LruCache::with_config(LruConfig {
            capacity: 4,
            expiry: Some(Duration::from_secs(10)),
        });

        cache.set("a", val("1"));
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.set("a", val("2"));
        tokio::time::advance(Duration::from_secs(8)).await;

        assert_eq!(cache.get("a"), Some(val("2")));
    }

    #[test]
    fn test_lru_concurrent_access() {
        let cache = std::sync::Arc::new(no_expiry(64));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..500 {
                        let key = format!("k{}", (t * 31 + i) % 100);
                        cache.set(&key, Bytes::from(key.clone()));
                        if let Some(v) = cache.get(&key) {
                            assert_eq!(v, Bytes::from(key.clone()));
                        }
                        if i % 7 == 0 {
                            cache.remove(&key);
                        }
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert!(cache.len() <= 64);
    }

    proptest! {
        #[test]
        fn prop_len_never_exceeds_capacity(
            capacity in 1usize..16,
            ops in proptest::collection::vec((0u8..3, 0u8..32), 0..200),
        ) {
            let cache = no_expiry(capacity);
            for (op, k) in ops {
                let key = format!("k{k}");
                match op {
                    0 => cache.set(&key, Bytes::from(vec![k])),
                    1 => { cache.get(&key); }
                    _ => { cache.remove(&key); }
                }
                prop_assert!(cache.len() <= capacity);
            }
        }

        #[test]
        fn prop_most_recent_set_survives(keys in proptest::collection::vec(0u8..64, 1..100)) {
            let cache = no_expiry(4);
            for k in &keys {
                cache.set(&format!("k{k}"), Bytes::from(vec![*k]));
            }
            let last = *keys.last().unwrap();
            prop_assert_eq!(cache.peek(&format!("k{last}")), Some(Bytes::from(vec![last])));
        }
    }
}
