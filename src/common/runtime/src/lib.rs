//! Async runtime utilities for anser.
//!
//! Provides runtime management and async utilities. The public conversion
//! API is synchronous; this crate supplies the bridge onto tokio.

use std::future::Future;

use common_error::{AnserError, AnserResult};
use tokio::runtime::Runtime;

/// Get or create a Tokio runtime for blocking operations.
pub fn get_runtime() -> AnserResult<Runtime> {
    Runtime::new().map_err(|e| AnserError::runtime(format!("Failed to create runtime: {e}")))
}

/// Block on a future using a fresh runtime.
pub fn block_on<F: Future>(future: F) -> AnserResult<F::Output> {
    let runtime = get_runtime()?;
    Ok(runtime.block_on(future))
}

/// Spawn a task on the current runtime.
pub fn spawn<F>(future: F) -> tokio::task::JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(future)
}

/// A handle to a set of spawned tasks.
pub struct JoinSet<T> {
    inner: tokio::task::JoinSet<T>,
}

impl<T: Send + 'static> JoinSet<T> {
    /// Create a new join set.
    pub fn new() -> Self {
        Self {
            inner: tokio::task::JoinSet::new(),
        }
    }

    /// Spawn a task into the set.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        self.inner.spawn(future);
    }

    /// Wait for the next task to complete.
    pub async fn join_next(&mut self) -> Option<Result<T, tokio::task::JoinError>> {
        self.inner.join_next().await
    }

    /// Drain the set, collecting every result in completion order.
    ///
    /// A panicked task surfaces as `RuntimeFailure`.
    pub async fn join_all(&mut self) -> AnserResult<Vec<T>> {
        let mut results = Vec::with_capacity(self.inner.len());
        while let Some(joined) = self.inner.join_next().await {
            results
                .push(joined.map_err(|e| AnserError::runtime(format!("worker task failed: {e}")))?);
        }
        Ok(results)
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Get the number of tasks in the set.
    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

impl<T: Send + 'static> Default for JoinSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_on() {
        let value = block_on(async { 21 * 2 }).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_join_all() {
        let total: i64 = block_on(async {
            let mut set = JoinSet::new();
            for i in 0..8i64 {
                set.spawn(async move { i });
            }
            set.join_all().await.unwrap().into_iter().sum()
        })
        .unwrap();
        assert_eq!(total, 28);
    }
}
