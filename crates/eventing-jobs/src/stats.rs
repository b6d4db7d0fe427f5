//! Job statistics.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters kept by a coordinator.
#[derive(Debug, Default)]
pub struct JobStatistics {
    started: AtomicU64,
    finished: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    retried: AtomicU64,
}

impl JobStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_started(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_finished(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }

    /// Combine counters with the current queue gauges.
    pub fn snapshot(&self, queued: u64, active: u64) -> StatisticsSnapshot {
        StatisticsSnapshot {
            queued,
            active,
            started: self.started.load(Ordering::SeqCst),
            finished: self.finished.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            cancelled: self.cancelled.load(Ordering::SeqCst),
            retried: self.retried.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
    /// Jobs waiting on this node.
    pub queued: u64,
    /// Jobs executing on this node.
    pub active: u64,
    pub started: u64,
    /// Jobs that finished successfully.
    pub finished: u64,
    /// Jobs that failed for the last time.
    pub failed: u64,
    pub cancelled: u64,
    /// Failed attempts that were rescheduled.
    pub retried: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let stats = JobStatistics::new();
        stats.record_started();
        stats.record_started();
        stats.record_finished();
        stats.record_retry();
        stats.record_failed();

        let snapshot = stats.snapshot(3, 1);
        assert_eq!(snapshot.queued, 3);
        assert_eq!(snapshot.active, 1);
        assert_eq!(snapshot.started, 2);
        assert_eq!(snapshot.finished, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.retried, 1);
        assert_eq!(snapshot.cancelled, 0);
    }
}
