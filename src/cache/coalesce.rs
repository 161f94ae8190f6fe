//! Request Coalescing
//!
//! Collapses concurrent calls for the same key into one execution.
//!
//! ```text
//!   caller A ──┐
//!   caller B ──┼──▶ in_flight["user:42"] ──▶ spawned task ──▶ result
//!   caller C ──┘          (shared)                  │
//!                                                   └─ removes "user:42"
//! ```
//!
//! The work runs on its own tokio task, so a caller that stops waiting does
//! not cancel it: the remaining waiters (and the cache) still get the result.
//! The map entry is removed as soon as the work finishes, so the next call
//! after completion starts a fresh execution.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

type SharedCall<V> = Shared<BoxFuture<'static, Result<V>>>;

/// Outcome of a coalesced call
#[derive(Debug, Clone)]
pub struct Coalesced<V> {
    /// The shared value
    pub value: V,
    /// True if this caller joined a call started by someone else
    pub shared: bool,
}

/// Per-key request coalescing group
pub struct Coalescer<V> {
    /// In-flight calls (key -> shared completion)
    in_flight: Mutex<HashMap<String, SharedCall<V>>>,
}

impl<V> Default for Coalescer<V> {
    fn default() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }
}

impl<V> Coalescer<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty group
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` for `key` unless a call for `key` is already in flight, in
    /// which case wait for that call and return its outcome.
    ///
    /// Every caller of one execution receives a clone of the same `Result`.
    /// The map lock only covers lookup and registration; `work` is invoked
    /// and spawned after it is released. Must be called from within a tokio
    /// runtime.
    pub async fn run<F, Fut>(self: &Arc<Self>, key: &str, work: F) -> Result<Coalesced<V>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let (call, leader) = {
            let mut in_flight = self.in_flight.lock();

            match in_flight.get(key) {
                Some(call) => {
                    tracing::debug!(key, "joining in-flight call");
                    (call.clone(), None)
                }
                None => {
                    let (tx, rx) = oneshot::channel();
                    let call = Self::completion(rx);
                    in_flight.insert(key.to_string(), call.clone());
                    (call, Some(tx))
                }
            }
        };

        let shared = leader.is_none();
        if let Some(tx) = leader {
            self.spawn(key.to_string(), work, tx);
        }

        call.await.map(|value| Coalesced { value, shared })
    }

    /// Shared completion that waiters poll; a dropped sender means the work
    /// panicked before producing a result
    fn completion(rx: oneshot::Receiver<Result<V>>) -> SharedCall<V> {
        async move {
            rx.await.unwrap_or_else(|_| {
                Err(Error::Internal("coalesced call aborted".to_string()))
            })
        }
        .boxed()
        .shared()
    }

    /// Build and spawn the work; the task unregisters the key the moment it
    /// finishes, then publishes the result.
    fn spawn<F, Fut>(self: &Arc<Self>, key: String, work: F, tx: oneshot::Sender<Result<V>>)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        // Armed before `work()` so a panicking builder still unregisters
        let unregister = Unregister {
            group: Arc::clone(self),
            key,
        };
        let work = work();

        tokio::spawn(async move {
            let result = work.await;
            drop(unregister);
            let _ = tx.send(result);
        });
    }

    /// Number of keys currently in flight
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Check whether a call for `key` is in flight
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.lock().contains_key(key)
    }
}

/// Removes the key on completion, including when the work panics
struct Unregister<V> {
    group: Arc<Coalescer<V>>,
    key: String,
}

impl<V> Drop for Unregister<V> {
    fn drop(&mut self) {
        self.group.in_flight.lock().remove(&self.key);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_single_caller() {
        let group = Arc::new(Coalescer::<u32>::new());

        let out = group.run("k", || async { Ok(7) }).await.unwrap();
        assert_eq!(out.value, 7);
        assert!(!out.shared);
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_execution() {
        let group = Arc::new(Coalescer::<u32>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let group = group.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    group
                        .run("k", move || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(42)
                        })
                        .await
                })
            })
            .collect();

        let mut shared = 0;
        for task in tasks {
            let out = task.await.unwrap().unwrap();
            assert_eq!(out.value, 42);
            if out.shared {
                shared += 1;
            }
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(shared, 49);
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failure_is_shared_and_not_retained() {
        let group = Arc::new(Coalescer::<u32>::new());

        let (a, b) = tokio::join!(
            group.run("k", || async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err(Error::compute("boom"))
            }),
            group.run("k", || async { Ok(1) }),
        );

        let (a, b) = (a.unwrap_err(), b.unwrap_err());
        match (&a, &b) {
            (Error::Compute(x), Error::Compute(y)) => assert!(Arc::ptr_eq(x, y)),
            other => panic!("unexpected: {other:?}"),
        }

        // Next call executes afresh
        let out = group.run("k", || async { Ok(2) }).await.unwrap();
        assert_eq!(out.value, 2);
        assert!(!out.shared);
    }

    #[tokio::test]
    async fn test_panicking_work_is_reported_and_unregistered() {
        let group = Arc::new(Coalescer::<u32>::new());

        let err = group
            .run("k", || async {
                let missing: Option<u32> = None;
                Ok(missing.expect("work exploded"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert!(!group.is_in_flight("k"));

        let out = group.run("k", || async { Ok(3) }).await.unwrap();
        assert_eq!(out.value, 3);
    }

    #[tokio::test]
    async fn test_work_is_built_outside_the_lock() {
        let group = Arc::new(Coalescer::<usize>::new());

        let inner = group.clone();
        let out = group
            .run("k", move || {
                // Would deadlock if the map lock were still held
                let registered = inner.is_in_flight("k");
                let count = inner.in_flight();
                async move {
                    assert!(registered);
                    Ok(count)
                }
            })
            .await
            .unwrap();

        assert_eq!(out.value, 1);
        assert!(!group.is_in_flight("k"));
    }

    #[tokio::test]
    async fn test_panicking_builder_unregisters() {
        let group = Arc::new(Coalescer::<u32>::new());

        let outcome = tokio::spawn({
            let group = group.clone();
            async move {
                group
                    .run("k", || -> futures::future::Ready<Result<u32>> {
                        let missing: Option<()> = None;
                        missing.expect("builder exploded");
                        futures::future::ready(Ok(0))
                    })
                    .await
            }
        })
        .await;
        assert!(outcome.is_err());
        assert!(!group.is_in_flight("k"));

        let out = group.run("k", || async { Ok(4) }).await.unwrap();
        assert_eq!(out.value, 4);
        assert!(!out.shared);
    }

    #[tokio::test]
    async fn test_distinct_keys_run_independently() {
        let group = Arc::new(Coalescer::<&'static str>::new());

        let (a, b) = tokio::join!(
            group.run("a", || async { Ok("a") }),
            group.run("b", || async { Ok("b") }),
        );

        assert_eq!(a.unwrap().value, "a");
        assert_eq!(b.unwrap().value, "b");
    }

    #[tokio::test]
    async fn test_abandoned_caller_does_not_cancel_work() {
        let group = Arc::new(Coalescer::<u32>::new());
        let finished = Arc::new(AtomicUsize::new(0));

        let flag = finished.clone();
        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            group.run("k", move || async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                flag.fetch_add(1, Ordering::SeqCst);
                Ok(5)
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(group.is_in_flight("k"));

        // A late joiner still gets the first result
        let out = group.run("k", || async { Ok(99) }).await.unwrap();
        assert_eq!(out.value, 5);
        assert!(out.shared);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(!group.is_in_flight("k"));
    }
}
