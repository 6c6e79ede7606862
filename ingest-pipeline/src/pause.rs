//! The `Gate` primitive guarding ingest against concurrent consolidation: drains
//! in-flight ingest operations, blocks new ones while paused, and resumes once
//! consolidation completes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{info, warn};

/// Dropped by whoever finished an in-flight ingest operation; never a raw
/// increment/decrement pair, so a panicking task can't leak the count.
pub struct InFlightGuard {
    controller: Arc<PauseControllerInner>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let remaining = self.controller.in_flight.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 {
            self.controller.drained.notify_waiters();
        }
    }
}

struct PauseControllerInner {
    paused: AtomicBool,
    in_flight: AtomicU64,
    ingested_since_pause_check: AtomicU64,
    drained: Notify,
}

#[derive(Clone)]
pub struct PauseController {
    inner: Arc<PauseControllerInner>,
}

impl Default for PauseController {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseController {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PauseControllerInner {
                paused: AtomicBool::new(false),
                in_flight: AtomicU64::new(0),
                ingested_since_pause_check: AtomicU64::new(0),
                drained: Notify::new(),
            }),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire)
    }

    /// Registers a new in-flight ingest slot. Callers must check `is_paused()` first and
    /// skip registration entirely while paused (§4.7 step 4).
    pub fn register_in_flight(&self) -> InFlightGuard {
        self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            controller: Arc::clone(&self.inner),
        }
    }

    pub fn record_ingestion(&self, chunks: u64) {
        self.inner.ingested_since_pause_check.fetch_add(chunks, Ordering::Relaxed);
    }

    fn take_ingested(&self) -> u64 {
        self.inner.ingested_since_pause_check.swap(0, Ordering::Relaxed)
    }

    /// Sets the pause flag, then awaits drain of already-registered guards, bounded by
    /// `drain_timeout`. Guards registered before this call completes normally; no new
    /// guard is issued once `paused` is observed true.
    pub async fn pause(&self, drain_timeout: Duration) {
        self.inner.paused.store(true, Ordering::Release);

        // Constructed before the in-flight check so a drop racing the check in between
        // is still observed: `Notified`'s first poll resolves immediately if a
        // `notify_waiters` happened after it was created, even before it was awaited.
        let drained = self.inner.drained.notified();
        if self.inner.in_flight.load(Ordering::Acquire) == 0 {
            return;
        }
        if tokio::time::timeout(drain_timeout, drained).await.is_err() {
            warn!("pause drain timed out; proceeding with in-flight operations still active");
        }
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::Release);
    }

    /// Background loop: once either threshold is crossed, pauses, runs `on_trigger`, then
    /// resumes.
    pub async fn watch<F, Fut>(
        &self,
        ingest_threshold: u64,
        time_threshold: Duration,
        drain_timeout: Duration,
        mut on_trigger: F,
    ) where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        loop {
            tokio::time::sleep(time_threshold).await;
            let ingested = self.take_ingested();
            if ingested == 0 {
                continue;
            }
            if ingested < ingest_threshold {
                // Restore the count; it hasn't crossed the threshold yet.
                self.inner
                    .ingested_since_pause_check
                    .fetch_add(ingested, Ordering::Relaxed);
                continue;
            }

            info!(ingested, "pause threshold crossed; draining ingest before consolidation");
            self.pause(drain_timeout).await;
            on_trigger().await;
            self.resume();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pause_returns_immediately_with_no_in_flight_work() {
        let controller = PauseController::new();
        controller.pause(Duration::from_millis(50)).await;
        assert!(controller.is_paused());
    }

    #[tokio::test]
    async fn pause_waits_for_guard_drop() {
        let controller = PauseController::new();
        let guard = controller.register_in_flight();

        let controller_clone = controller.clone();
        let pause_task = tokio::spawn(async move {
            controller_clone.pause(Duration::from_secs(5)).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);

        pause_task.await.expect("pause task");
        assert!(controller.is_paused());
    }

    #[test]
    fn new_controller_is_not_paused() {
        let controller = PauseController::new();
        assert!(!controller.is_paused());
    }
}
