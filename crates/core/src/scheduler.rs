//! Single-slot cancellable wakeup.
//!
//! A [`Wakeup`] holds at most one pending timer. Arming replaces whatever was
//! pending; cancelling clears the slot. When the timer fires, its task is
//! handed off to a fresh tokio task and the slot no longer refers to it, so a
//! later `arm` or `cancel` never aborts work that has already started.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::trace;

/// The next scheduled run of some task, if any.
#[derive(Default)]
pub struct Wakeup {
    slot: Mutex<Option<JoinHandle<()>>>,
}

impl Wakeup {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `task` after `delay`, replacing any pending wakeup.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tokio::spawn(task);
        });
        if let Some(previous) = self.slot().replace(handle) {
            previous.abort();
        }
        trace!(delay_ms = delay.as_millis() as u64, "wakeup armed");
    }

    /// Drop the pending wakeup, if any. Returns whether one was pending.
    pub fn cancel(&self) -> bool {
        match self.slot().take() {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                trace!(pending, "wakeup cancelled");
                pending
            }
            None => false,
        }
    }

    /// Whether a wakeup is waiting to fire.
    pub fn is_armed(&self) -> bool {
        self.slot().as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Wakeup {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter_task(counter: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let wakeup = Wakeup::new();
        wakeup.arm(Duration::from_millis(100), counter_task(&fired));
        assert!(wakeup.is_armed());

        tokio::time::sleep(Duration::from_millis(150)).await;
        tokio::task::yield_now().await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!wakeup.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_pending() {
        let fired = Arc::new(AtomicUsize::new(0));
        let wakeup = Wakeup::new();
        wakeup.arm(Duration::from_millis(100), counter_task(&fired));
        wakeup.arm(Duration::from_millis(100), counter_task(&fired));

        tokio::time::sleep(Duration::from_millis(500)).await;
        tokio::task::yield_now().await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let fired = Arc::new(AtomicUsize::new(0));
        let wakeup = Wakeup::new();
        assert!(!wakeup.cancel());

        wakeup.arm(Duration::from_millis(100), counter_task(&fired));
        assert!(wakeup.cancel());
        assert!(!wakeup.is_armed());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
