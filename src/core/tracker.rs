use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

/// Counter of outstanding work with an async wait-for-zero.
///
/// The pool keeps one for everything submitted or spawned; each action with
/// prerequisites makes a private one to join on them.
#[derive(Debug, Default)]
pub struct CompletionTracker {
    outstanding: AtomicUsize,
    notify: Notify,
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `n` more units of outstanding work
    pub fn add(&self, n: usize) {
        self.outstanding.fetch_add(n, Ordering::AcqRel);
    }

    /// Mark one unit finished, waking every waiter when the count reaches zero
    pub fn done(&self) {
        let previous = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));

        match previous {
            Ok(1) => self.notify.notify_waiters(),
            Ok(_) => {}
            Err(_) => warn!("CompletionTracker::done called with nothing outstanding"),
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn is_idle(&self) -> bool {
        self.outstanding() == 0
    }

    /// Wait until nothing is outstanding; returns at once if already idle
    pub async fn wait(&self) {
        loop {
            // Registered before the check so a notify_waiters in between is not lost.
            let notified = self.notify.notified();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

/// Marks one unit finished on the pool tracker, and on a parent join
/// counter when present, when dropped.
#[derive(Debug)]
pub struct CompletionGuard {
    tracker: Arc<CompletionTracker>,
    parent: Option<Arc<CompletionTracker>>,
}

impl CompletionGuard {
    /// Register one unit of work on `tracker` (and `parent`) and return its guard
    pub fn register(tracker: Arc<CompletionTracker>, parent: Option<Arc<CompletionTracker>>) -> Self {
        tracker.add(1);
        if let Some(parent) = &parent {
            parent.add(1);
        }
        Self { tracker, parent }
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.tracker.done();
        if let Some(parent) = &self.parent {
            parent.done();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_returns_immediately_when_idle() {
        let tracker = CompletionTracker::new();
        tokio::time::timeout(Duration::from_millis(100), tracker.wait())
            .await
            .expect("idle tracker must not block");
    }

    #[test]
    fn test_done_never_underflows() {
        let tracker = CompletionTracker::new();
        tracker.done();
        assert_eq!(tracker.outstanding(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_wait_observes_all_completions() {
        let tracker = Arc::new(CompletionTracker::new());
        tracker.add(16);

        for i in 0..16u64 {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(i * 3)).await;
                tracker.done();
            });
        }

        tokio::time::timeout(Duration::from_secs(2), tracker.wait())
            .await
            .expect("all units complete");
        assert!(tracker.is_idle());
    }

    #[test]
    fn test_guard_signals_tracker_and_parent() {
        let tracker = Arc::new(CompletionTracker::new());
        let parent = Arc::new(CompletionTracker::new());

        let guard = CompletionGuard::register(tracker.clone(), Some(parent.clone()));
        assert_eq!(tracker.outstanding(), 1);
        assert_eq!(parent.outstanding(), 1);

        drop(guard);
        assert!(tracker.is_idle());
        assert!(parent.is_idle());
    }

    #[test]
    fn test_guard_runs_during_unwinding() {
        let tracker = Arc::new(CompletionTracker::new());
        let cloned = tracker.clone();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = CompletionGuard::register(cloned, None);
            panic!("boom");
        }));

        assert!(result.is_err());
        assert!(tracker.is_idle());
    }
}
