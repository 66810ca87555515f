//! Bounded settle-all task pool
//!
//! Both enrichment pipelines fan out through one of these: every task is
//! spawned, at most `limit` run at once, and the pool resolves only after
//! every task has settled. A panicking task loses its own slot in the
//! result vector and nothing else.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// A concurrency-bounded task pool
#[derive(Debug, Clone)]
pub struct TaskPool {
    limit: usize,
}

impl TaskPool {
    /// Creates a pool allowing at most `limit` tasks in flight
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    /// The configured concurrency bound
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Runs every task to completion, bounding concurrency
    ///
    /// Results are returned in input order. A task that panicked yields
    /// `None` in its slot; all other tasks still run and settle.
    pub async fn run_all<F, T>(&self, tasks: Vec<F>) -> Vec<Option<T>>
    where
        F: std::future::Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let total = tasks.len();
        let semaphore = Arc::new(Semaphore::new(self.limit));
        let mut set = JoinSet::new();

        for (index, task) in tasks.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (index, task.await)
            });
        }

        let mut results: Vec<Option<T>> = std::iter::repeat_with(|| None).take(total).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, value)) => results[index] = Some(value),
                Err(e) => {
                    tracing::warn!("pool task aborted: {}", e);
                }
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_preserve_input_order() {
        let pool = TaskPool::new(3);
        let tasks: Vec<_> = (0..10u64)
            .map(|i| async move {
                // Later tasks finish first
                tokio::time::sleep(Duration::from_millis(20 - i)).await;
                i
            })
            .collect();

        let results = pool.run_all(tasks).await;
        let values: Vec<u64> = results.into_iter().flatten().collect();
        assert_eq!(values, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_limit() {
        let limit = 3;
        let pool = TaskPool::new(limit);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let observed_max = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let in_flight = Arc::clone(&in_flight);
                let observed_max = Arc::clone(&observed_max);
                async move {
                    let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    observed_max.fetch_max(current, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .collect();

        pool.run_all(tasks).await;
        assert!(observed_max.load(Ordering::SeqCst) <= limit);
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_poison_pool() {
        let pool = TaskPool::new(2);
        let tasks: Vec<_> = (0..5u32)
            .map(|i| async move {
                if i == 2 {
                    panic!("boom");
                }
                i
            })
            .collect();

        let results = pool.run_all(tasks).await;
        assert_eq!(results.len(), 5);
        assert!(results[2].is_none());
        assert_eq!(results.iter().flatten().count(), 4);
    }

    #[tokio::test]
    async fn test_zero_limit_clamped_to_one() {
        let pool = TaskPool::new(0);
        assert_eq!(pool.limit(), 1);
        let results = pool.run_all(vec![async { 1 }]).await;
        assert_eq!(results, vec![Some(1)]);
    }
}
