// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cooperative shutdown across all worker tasks.
//!
//! One broadcast stop signal plus a counter of live workers. Every
//! long-lived task registers on entry, deregisters on exit, and selects
//! between its work channel and the stop signal on each iteration.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

/// Coordinates shutdown between the accept loop, dispatcher, table actors,
/// and connection tasks.
#[derive(Debug)]
pub struct StopCoordinator {
    drain_timeout: Duration,
    workers: AtomicU32,
    stop_triggered: AtomicBool,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl StopCoordinator {
    /// Create a new coordinator with the given drain timeout.
    #[must_use]
    pub fn new(drain_timeout: Duration) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            drain_timeout,
            workers: AtomicU32::new(0),
            stop_triggered: AtomicBool::new(false),
            stop_tx,
            stop_rx,
        }
    }

    /// Record that a worker task has started.
    pub fn worker_started(&self) {
        self.workers.fetch_add(1, Ordering::SeqCst);
    }

    /// Record that a worker task has finished.
    pub fn worker_finished(&self) {
        self.workers.fetch_sub(1, Ordering::SeqCst);
    }

    /// Current count of live workers.
    #[must_use]
    pub fn worker_count(&self) -> u32 {
        self.workers.load(Ordering::SeqCst)
    }

    /// Check if shutdown has been triggered.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.stop_triggered.load(Ordering::SeqCst)
    }

    /// Fire the stop signal.
    pub fn trigger_stop(&self) {
        self.stop_triggered.store(true, Ordering::SeqCst);
        let _ = self.stop_tx.send(true);
        info!("stop signal fired, draining workers");
    }

    /// Get a receiver to select against; it resolves once the signal fires.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.stop_rx.clone()
    }

    /// Wait for the worker counter to reach zero.
    ///
    /// Returns `true` if every worker exited within the drain timeout.
    pub async fn wait_for_drain(&self) -> bool {
        let check_interval = Duration::from_millis(10);
        let start = std::time::Instant::now();

        loop {
            if self.worker_count() == 0 {
                info!("all workers drained");
                return true;
            }
            if start.elapsed() >= self.drain_timeout {
                warn!(remaining = self.worker_count(), "drain timeout reached");
                return false;
            }
            tokio::time::sleep(check_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_worker_counting() {
        let stop = StopCoordinator::new(Duration::from_secs(1));
        assert_eq!(stop.worker_count(), 0);

        stop.worker_started();
        stop.worker_started();
        assert_eq!(stop.worker_count(), 2);

        stop.worker_finished();
        assert_eq!(stop.worker_count(), 1);
        stop.worker_finished();
        assert_eq!(stop.worker_count(), 0);
    }

    #[test]
    fn test_trigger_stop() {
        let stop = StopCoordinator::new(Duration::from_secs(1));
        assert!(!stop.is_stopping());
        stop.trigger_stop();
        assert!(stop.is_stopping());
        assert!(*stop.subscribe().borrow());
    }

    #[tokio::test]
    async fn test_subscriber_observes_signal() {
        let stop = StopCoordinator::new(Duration::from_secs(1));
        let mut rx = stop.subscribe();
        stop.trigger_stop();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn test_drain_completes_when_empty() {
        let stop = StopCoordinator::new(Duration::from_secs(1));
        assert!(stop.wait_for_drain().await);
    }

    #[tokio::test]
    async fn test_drain_waits_for_workers() {
        let stop = Arc::new(StopCoordinator::new(Duration::from_secs(2)));
        stop.worker_started();

        let stop_clone = Arc::clone(&stop);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stop_clone.worker_finished();
        });

        assert!(stop.wait_for_drain().await);
        assert_eq!(stop.worker_count(), 0);
    }

    #[tokio::test]
    async fn test_drain_timeout_enforced() {
        let stop = StopCoordinator::new(Duration::from_millis(50));
        stop.worker_started();
        assert!(!stop.wait_for_drain().await);
        assert_eq!(stop.worker_count(), 1);
    }
}
