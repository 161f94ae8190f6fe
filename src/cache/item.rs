//! Cache Item - request descriptor for `set` and `once`

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};

use crate::error::BoxError;

/// Caller-supplied computation producing the value to cache.
///
/// `Fn` rather than `FnOnce`: a corrupted cached entry makes `once` run the
/// computation on its retry.
pub type ComputeFn<T> =
    Arc<dyn Fn() -> BoxFuture<'static, std::result::Result<T, BoxError>> + Send + Sync>;

/// Expiration requested for an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ttl {
    /// Use the cache's default TTL
    #[default]
    Default,
    /// Expire after the given duration; values below the minimum TTL fall
    /// back to the default
    After(Duration),
    /// Keep in the local tier only; never written to the remote store
    LocalOnly,
}

impl Ttl {
    /// Resolve to the remote TTL, or `None` when the remote write is skipped
    pub fn resolve(&self, default: Duration, min: Duration) -> Option<Duration> {
        match *self {
            Ttl::Default => Some(default),
            Ttl::After(ttl) if ttl < min => {
                tracing::debug!(?ttl, ?min, "ttl below minimum, using default");
                Some(default)
            }
            Ttl::After(ttl) => Some(ttl),
            Ttl::LocalOnly => None,
        }
    }
}

impl From<Duration> for Ttl {
    fn from(ttl: Duration) -> Self {
        Ttl::After(ttl)
    }
}

/// Remote write mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetCondition {
    /// Unconditional write
    #[default]
    Always,
    /// Only overwrite an existing key
    IfExists,
    /// Only create a missing key
    IfAbsent,
}

/// A cache request: the key plus where its value comes from and how to store it.
///
/// ```
/// use std::time::Duration;
/// use tiercache::cache::Item;
///
/// let item = Item::new("greeting")
///     .compute(|| async { Ok::<_, std::io::Error>("hello".to_string()) })
///     .ttl(Duration::from_secs(30));
/// assert_eq!(item.key(), "greeting");
/// ```
pub struct Item<T> {
    pub(crate) key: String,
    pub(crate) value: Option<T>,
    pub(crate) compute: Option<ComputeFn<T>>,
    pub(crate) ttl: Ttl,
    pub(crate) skip_local_cache: bool,
    pub(crate) condition: SetCondition,
}

impl<T> Item<T> {
    /// Create an item with no value source
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
            compute: None,
            ttl: Ttl::Default,
            skip_local_cache: false,
            condition: SetCondition::Always,
        }
    }

    /// Supply the value directly (takes precedence over `compute`)
    pub fn value(mut self, value: T) -> Self {
        self.value = Some(value);
        self
    }

    /// Supply the value through a computation
    pub fn compute<F, Fut, E>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
        T: 'static,
    {
        let compute: ComputeFn<T> = Arc::new(move || {
            f().map(|r| r.map_err(|e| -> BoxError { e.into() }))
                .boxed()
        });
        self.compute = Some(compute);
        self
    }

    /// Set the expiration
    pub fn ttl(mut self, ttl: impl Into<Ttl>) -> Self {
        self.ttl = ttl.into();
        self
    }

    /// Keep the value out of the remote store
    pub fn local_only(self) -> Self {
        self.ttl(Ttl::LocalOnly)
    }

    /// Bypass the local tier for reads and writes made on behalf of this item
    pub fn skip_local_cache(mut self) -> Self {
        self.skip_local_cache = true;
        self
    }

    /// Only write remotely if the key already exists
    pub fn set_if_exists(mut self) -> Self {
        self.condition = SetCondition::IfExists;
        self
    }

    /// Only write remotely if the key is absent
    pub fn set_if_absent(mut self) -> Self {
        self.condition = SetCondition::IfAbsent;
        self
    }

    /// Get the key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the requested expiration
    pub fn expiration(&self) -> Ttl {
        self.ttl
    }

    /// Get the remote write mode
    pub fn condition(&self) -> SetCondition {
        self.condition
    }
}

impl<T: fmt::Debug> fmt::Debug for Item<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Item")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("compute", &self.compute.as_ref().map(|_| "<fn>"))
            .field("ttl", &self.ttl)
            .field("skip_local_cache", &self.skip_local_cache)
            .field("condition", &self.condition)
            .finish()
    }
}
