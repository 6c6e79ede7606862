//! Bounded task executor whose parallelism floats within `[min, max]`, driven by the
//! `CapacityMonitor` — the same `Semaphore`-backed pooling primitive the reranker pool
//! uses for capacity control, generalized here to a resizable permit count.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::error::AppError;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::capacity::CapacityMonitor;

#[derive(Debug, Clone, Copy)]
pub struct ExecutorState {
    pub current_concurrency: usize,
    pub active: usize,
    pub pending: usize,
}

/// A semaphore whose permit count floats between `min` and `max`. Shrinking acquires and
/// forgets permits (never cancels in-flight tasks); growing adds permits back.
pub struct AdaptiveExecutor {
    semaphore: Arc<Semaphore>,
    current_concurrency: AtomicUsize,
    active: AtomicUsize,
    pending: AtomicUsize,
    min: usize,
    max: usize,
}

impl AdaptiveExecutor {
    pub fn new(min: usize, max: usize) -> Self {
        let min = min.max(1);
        let max = max.max(min);
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            current_concurrency: AtomicUsize::new(max),
            active: AtomicUsize::new(0),
            pending: AtomicUsize::new(0),
            min,
            max,
        }
    }

    pub fn get_state(&self) -> ExecutorState {
        ExecutorState {
            current_concurrency: self.current_concurrency.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
        }
    }

    /// Acquires a permit (FIFO via the semaphore's own wait queue) and runs `task`.
    pub async fn run<F, Fut, T>(&self, task: F) -> Result<T, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        self.pending.fetch_add(1, Ordering::Relaxed);
        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|err| AppError::Internal(err.to_string()));
        self.pending.fetch_sub(1, Ordering::Relaxed);
        let permit = permit?;

        self.active.fetch_add(1, Ordering::Relaxed);
        let result = task().await;
        self.active.fetch_sub(1, Ordering::Relaxed);
        drop(permit);
        result
    }

    /// Resizes towards `target` within `[min, max]`. Shrinking forgets permits down to
    /// the new size (never revokes permits already held by in-flight tasks); growing adds
    /// permits back up to the new size.
    pub fn resize(&self, target: usize) {
        let target = target.clamp(self.min, self.max);
        let current = self.current_concurrency.swap(target, Ordering::Relaxed);
        if target < current {
            self.semaphore.forget_permits(current - target);
        } else if target > current {
            self.semaphore.add_permits(target - current);
        }
    }

    /// Spawns a background task that periodically asks `monitor` for a recommendation
    /// and resizes towards it. Returns the `tokio::task::JoinHandle` so callers can abort
    /// it on shutdown.
    pub fn start_watchdog(self: &Arc<Self>, monitor: Arc<CapacityMonitor>, poll: Duration) -> tokio::task::JoinHandle<()> {
        let executor = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(poll).await;
                let recommended = monitor.recommended_concurrency(executor.max, executor.min, executor.max);
                let before = executor.get_state().current_concurrency;
                if recommended != before {
                    info!(before, after = recommended, "adaptive executor resizing");
                    executor.resize(recommended);
                } else {
                    debug!(concurrency = before, "adaptive executor unchanged");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_task_and_returns_result() {
        let executor = AdaptiveExecutor::new(1, 4);
        let result = executor.run(|| async { Ok::<_, AppError>(42) }).await.expect("run");
        assert_eq!(result, 42);
        assert_eq!(executor.get_state().active, 0);
    }

    #[tokio::test]
    async fn resize_clamps_within_bounds() {
        let executor = AdaptiveExecutor::new(2, 8);
        executor.resize(100);
        assert_eq!(executor.get_state().current_concurrency, 8);
        executor.resize(0);
        assert_eq!(executor.get_state().current_concurrency, 2);
    }
}
