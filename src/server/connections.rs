//! Connection admission and drain on shutdown.
//!
//! Every channel holds a [`ConnectionGuard`] for its lifetime. Once draining
//! starts no new guards are handed out, and shutdown waits for the existing
//! ones to drop.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

/// Result of a drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainResult {
    Complete,
    Timeout { remaining: usize },
}

/// Counts live connections against a limit.
pub struct ConnectionTracker {
    active: AtomicUsize,
    max_connections: usize,
    draining: AtomicBool,
    released: Notify,
}

impl ConnectionTracker {
    pub fn new(max_connections: usize) -> Arc<Self> {
        Arc::new(Self {
            active: AtomicUsize::new(0),
            max_connections: max_connections.max(1),
            draining: AtomicBool::new(false),
            released: Notify::new(),
        })
    }

    /// Try to admit a connection. `None` when full or draining.
    pub fn try_acquire(self: &Arc<Self>) -> Option<ConnectionGuard> {
        loop {
            if self.draining.load(Ordering::SeqCst) {
                return None;
            }
            let current = self.active.load(Ordering::Relaxed);
            if current >= self.max_connections {
                return None;
            }

            // CAS to atomically increment
            if self
                .active
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                return Some(ConnectionGuard {
                    tracker: Arc::clone(self),
                });
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Stop admitting connections and wait up to `timeout` for live ones to end.
    pub async fn drain(&self, timeout: Duration) -> DrainResult {
        self.draining.store(true, Ordering::SeqCst);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let count = self.active_count();
            if count == 0 {
                return DrainResult::Complete;
            }

            tokio::select! {
                _ = notified => continue,
                _ = tokio::time::sleep_until(deadline) => {
                    return match self.active_count() {
                        0 => DrainResult::Complete,
                        remaining => DrainResult::Timeout { remaining },
                    };
                }
            }
        }
    }

    fn release(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.released.notify_waiters();
    }
}

/// RAII guard that releases its slot on drop.
pub struct ConnectionGuard {
    tracker: Arc<ConnectionTracker>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.release();
    }
}

impl std::fmt::Debug for ConnectionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionGuard")
            .field("active", &self.tracker.active_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_enforced() {
        let tracker = ConnectionTracker::new(2);
        let a = tracker.try_acquire().unwrap();
        let _b = tracker.try_acquire().unwrap();
        assert!(tracker.try_acquire().is_none());
        drop(a);
        assert_eq!(tracker.active_count(), 1);
        assert!(tracker.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_drain_waits_for_release() {
        let tracker = ConnectionTracker::new(4);
        let guard = tracker.try_acquire().unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(guard);
        });
        let result = tracker.drain(Duration::from_secs(5)).await;
        assert_eq!(result, DrainResult::Complete);
        assert!(tracker.try_acquire().is_none(), "no admission while draining");
    }

    #[tokio::test]
    async fn test_drain_timeout() {
        let tracker = ConnectionTracker::new(4);
        let _guard = tracker.try_acquire().unwrap();
        let result = tracker.drain(Duration::from_millis(20)).await;
        assert_eq!(result, DrainResult::Timeout { remaining: 1 });
    }
}
