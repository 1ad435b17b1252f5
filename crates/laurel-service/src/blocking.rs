//! Running store calls off the async runtime.
//!
//! The `Store` trait is blocking. Every call goes through [`StoreRunner::run`],
//! which moves it to the blocking pool and bounds the wait. A call that times out
//! keeps running to completion on the pool; only the caller stops waiting.
//! Batch work that must not overlap with its own next run goes through
//! [`StoreRunner::run_to_completion`] instead, which waits for the result.

use std::sync::Arc;
use std::time::Duration;

use laurel_store::Store;

use crate::error::{EngineError, Result};

/// Shared handle for executing store calls.
#[derive(Clone)]
pub struct StoreRunner {
    store: Arc<dyn Store>,
    timeout: Duration,
}

impl StoreRunner {
    /// Wrap a store with a per-call timeout.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Run `f` against the store on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns the store's error, `EngineError::Timeout` if the call exceeds the
    /// timeout, or `EngineError::Join` if the task panicked.
    pub async fn run<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Store) -> laurel_store::Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let task = tokio::task::spawn_blocking(move || f(store.as_ref()));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result.map_err(EngineError::from),
            Ok(Err(join)) => {
                tracing::error!(operation, error = %join, "Store task failed");
                Err(EngineError::Join(join.to_string()))
            }
            Err(_) => {
                tracing::warn!(
                    operation,
                    timeout_ms = %self.timeout.as_millis(),
                    "Store call timed out"
                );
                Err(EngineError::Timeout { operation })
            }
        }
    }

    /// Run `f` against the store on the blocking pool and wait for it to finish.
    ///
    /// Passing the timeout only logs a warning: the caller gets the real result
    /// of the call, never a timeout for work that later commits.
    ///
    /// # Errors
    ///
    /// Returns the store's error, or `EngineError::Join` if the task panicked.
    pub async fn run_to_completion<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Store) -> laurel_store::Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let mut task = tokio::task::spawn_blocking(move || f(store.as_ref()));

        let joined = match tokio::time::timeout(self.timeout, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                tracing::warn!(
                    operation,
                    timeout_ms = %self.timeout.as_millis(),
                    "Store call is slow; waiting for it to finish"
                );
                task.await
            }
        };

        joined
            .map_err(|join| {
                tracing::error!(operation, error = %join, "Store task failed");
                EngineError::Join(join.to_string())
            })?
            .map_err(EngineError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use laurel_store::MemoryStore;

    #[tokio::test]
    async fn runs_calls_and_maps_errors() {
        let runner = StoreRunner::new(Arc::new(MemoryStore::new()), Duration::from_secs(5));

        let badges = runner.run("list_badges", |s| s.list_badges()).await.unwrap();
        assert!(badges.is_empty());

        let err = runner
            .run("fail", |_| -> laurel_store::Result<()> {
                Err(laurel_store::StoreError::Database("disk gone".into()))
            })
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn slow_calls_time_out() {
        let runner = StoreRunner::new(Arc::new(MemoryStore::new()), Duration::from_millis(10));
        let err = runner
            .run("slow", |_| {
                std::thread::sleep(Duration::from_millis(200));
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout { operation: "slow" }));
    }

    #[tokio::test]
    async fn run_to_completion_outlasts_the_timeout() {
        let runner = StoreRunner::new(Arc::new(MemoryStore::new()), Duration::from_millis(10));
        let value = runner
            .run_to_completion("slow", |_| {
                std::thread::sleep(Duration::from_millis(100));
                Ok(7)
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
