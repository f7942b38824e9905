//! Graceful shutdown of open subscriber streams.
//!
//! Every streaming `/subscribe` response holds a [`StreamGuard`] for as long
//! as it is open. On shutdown the coordinator flips a watch flag that each
//! stream listens to, then waits until all guards have been dropped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};

#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    stop_tx: watch::Sender<bool>,
    open_streams: AtomicUsize,
    /// Notified when the last stream closes
    drained: Notify,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                stop_tx,
                open_streams: AtomicUsize::new(0),
                drained: Notify::new(),
            }),
        }
    }

    /// Track a new stream. Hold the guard for the stream's lifetime and stop
    /// streaming once the receiver reports `true`.
    pub fn register(&self) -> (StreamGuard, watch::Receiver<bool>) {
        self.inner.open_streams.fetch_add(1, Ordering::SeqCst);
        let guard = StreamGuard {
            inner: self.inner.clone(),
        };
        (guard, self.inner.stop_tx.subscribe())
    }

    pub fn shutdown(&self) {
        self.inner.stop_tx.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.inner.stop_tx.borrow()
    }

    /// Resolves once every registered stream has closed.
    pub async fn wait_for_all_closed(&self) {
        loop {
            let drained = self.inner.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();

            let count = self.inner.open_streams.load(Ordering::SeqCst);
            if count == 0 {
                return;
            }
            tracing::debug!(count, "waiting for subscriber streams to close");
            drained.await;
        }
    }

    pub fn active_count(&self) -> usize {
        self.inner.open_streams.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves when shutdown is signalled on `rx`, or when the coordinator is gone.
pub async fn signalled(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Keeps a stream counted as open until dropped.
pub struct StreamGuard {
    inner: Arc<Inner>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if self.inner.open_streams.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.drained.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_returns_immediately_without_streams() {
        let coord = ShutdownCoordinator::new();
        coord.shutdown();
        tokio::time::timeout(Duration::from_millis(50), coord.wait_for_all_closed())
            .await
            .expect("nothing to wait for");
    }

    #[tokio::test]
    async fn test_wait_until_last_guard_drops() {
        let coord = ShutdownCoordinator::new();
        let (first, _) = coord.register();
        let (second, _) = coord.register();
        assert_eq!(coord.active_count(), 2);

        let waiter = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.wait_for_all_closed().await })
        };

        drop(first);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        assert_eq!(coord.active_count(), 1);

        drop(second);
        tokio::time::timeout(Duration::from_millis(100), waiter)
            .await
            .expect("should complete")
            .expect("should not panic");
        assert_eq!(coord.active_count(), 0);
    }

    #[tokio::test]
    async fn test_signalled_resolves_on_shutdown() {
        let coord = ShutdownCoordinator::new();
        let (_guard, rx) = coord.register();
        assert!(!coord.is_shutting_down());

        let pending = tokio::spawn(signalled(rx));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!pending.is_finished());

        coord.shutdown();
        assert!(coord.is_shutting_down());
        tokio::time::timeout(Duration::from_millis(100), pending)
            .await
            .expect("signal should arrive")
            .unwrap();
    }

    #[tokio::test]
    async fn test_signalled_after_shutdown_is_immediate() {
        let coord = ShutdownCoordinator::new();
        coord.shutdown();
        let (_guard, rx) = coord.register();

        tokio::time::timeout(Duration::from_millis(50), signalled(rx))
            .await
            .expect("already shut down");
    }
}
