//! Keyed single-execution tracking.
//!
//! Guarantees that for any key, at most one instance of an operation
//! runs at a time: the first caller executes it, and every caller that
//! arrives while it is pending joins the same shared future and
//! observes the identical outcome. This backs the at-most-one-transfer
//! and one-packaging-run-per-stream-id guarantees.

use crate::error::{Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;

type SharedOutcome<T> = Shared<BoxFuture<'static, std::result::Result<T, Error>>>;

/// Map from key to the in-flight operation for that key.
///
/// Cheap to clone; clones share the underlying map. `T` must be `Clone`
/// because every joined caller receives its own copy of the outcome.
pub struct InFlight<T: Clone + Send + Sync + 'static> {
    map: Arc<DashMap<String, SharedOutcome<T>>>,
}

impl<T: Clone + Send + Sync + 'static> Clone for InFlight<T> {
    fn clone(&self) -> Self {
        Self {
            map: Arc::clone(&self.map),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for InFlight<T> {
    fn default() -> Self {
        Self {
            map: Arc::new(DashMap::new()),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> InFlight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an operation for this key is currently pending.
    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Run `operation` under `key`, or join the one already running.
    ///
    /// The caller that installs the entry removes it again once the
    /// operation settles; callers that joined keep their handle on the
    /// shared result regardless.
    pub async fn run<F>(&self, key: &str, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let (shared, owner) = match self.map.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                tracing::debug!(key = %key, "Joining in-flight operation");
                (entry.get().clone(), false)
            }
            Entry::Vacant(entry) => {
                let shared = operation.boxed().shared();
                entry.insert(shared.clone());
                (shared, true)
            }
        };

        let result = shared.await;

        if owner {
            self.map.remove(key);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_execution() {
        let inflight: InFlight<u64> = InFlight::new();
        let executions = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let inflight = inflight.clone();
            let executions = Arc::clone(&executions);
            handles.push(tokio::spawn(async move {
                inflight
                    .run("abc123", async move {
                        executions.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(42)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 42);
        }
        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert!(!inflight.contains("abc123"));
    }

    #[tokio::test]
    async fn test_failure_is_shared() {
        let inflight: InFlight<u64> = InFlight::new();
        let slow = {
            let inflight = inflight.clone();
            tokio::spawn(async move {
                inflight
                    .run("abc123", async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err(Error::download("connection reset"))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let joined = inflight
            .run("abc123", async { Ok(1) })
            .await
            .expect_err("joined caller must see the shared failure");
        assert_eq!(joined.kind(), "download");
        assert!(slow.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_key_is_released_after_completion() {
        let inflight: InFlight<u64> = InFlight::new();
        let executions = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let executions = Arc::clone(&executions);
            let value = inflight
                .run("abc123", async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await
                .unwrap();
            assert_eq!(value, 7);
        }

        // Sequential calls each execute; only overlapping ones join.
        assert_eq!(executions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_distinct_keys_run_independently() {
        let inflight: InFlight<u64> = InFlight::new();
        let a = inflight.run("a", async { Ok(1) });
        let b = inflight.run("b", async { Ok(2) });
        let (a, b) = tokio::join!(a, b);
        assert_eq!(a.unwrap(), 1);
        assert_eq!(b.unwrap(), 2);
    }
}
