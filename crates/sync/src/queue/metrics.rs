//! Queue metrics tracking.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// Atomic counters updated on every queue operation.
#[derive(Debug, Default)]
pub struct QueueMetrics {
    enqueued: AtomicU64,
    drained: AtomicU64,
    acknowledged: AtomicU64,
    requeued: AtomicU64,
    evicted: AtomicU64,
    expired: AtomicU64,
    rejected: AtomicU64,
    depth: AtomicUsize,
    depth_max: AtomicUsize,
}

impl QueueMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_enqueue(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drain(&self, count: u64) {
        self.drained.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_acknowledge(&self) {
        self.acknowledged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_requeue(&self) {
        self.requeued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expiry(&self, count: u64) {
        self.expired.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_rejection(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn update_depth(&self, depth: usize) {
        self.depth.store(depth, Ordering::Relaxed);
        self.depth_max.fetch_max(depth, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> QueueMetricsSnapshot {
        QueueMetricsSnapshot {
            total_enqueued: self.enqueued.load(Ordering::Acquire),
            total_drained: self.drained.load(Ordering::Acquire),
            total_acknowledged: self.acknowledged.load(Ordering::Acquire),
            total_requeued: self.requeued.load(Ordering::Acquire),
            total_evicted: self.evicted.load(Ordering::Acquire),
            total_expired: self.expired.load(Ordering::Acquire),
            total_rejected: self.rejected.load(Ordering::Acquire),
            current_depth: self.depth.load(Ordering::Acquire),
            depth_max: self.depth_max.load(Ordering::Acquire),
        }
    }
}

/// Point-in-time view of queue counters for statistics reporting.
#[derive(Debug, Clone, Serialize)]
pub struct QueueMetricsSnapshot {
    pub total_enqueued: u64,
    pub total_drained: u64,
    pub total_acknowledged: u64,
    pub total_requeued: u64,
    pub total_evicted: u64,
    pub total_expired: u64,
    pub total_rejected: u64,
    pub current_depth: usize,
    pub depth_max: usize,
}

#[cfg(test)]
mod tests {
    //! Unit tests for queue metrics.
    use super::*;

    /// Validates counter accumulation and depth high-water tracking.
    #[test]
    fn test_counters_and_depth_max() {
        let metrics = QueueMetrics::new();

        metrics.record_enqueue();
        metrics.record_enqueue();
        metrics.update_depth(2);
        metrics.record_drain(2);
        metrics.update_depth(0);
        metrics.record_acknowledge();
        metrics.record_rejection();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_enqueued, 2);
        assert_eq!(snapshot.total_drained, 2);
        assert_eq!(snapshot.total_acknowledged, 1);
        assert_eq!(snapshot.total_rejected, 1);
        assert_eq!(snapshot.current_depth, 0);
        assert_eq!(snapshot.depth_max, 2);
    }
}
