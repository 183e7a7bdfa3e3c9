//! Segment Deletion Metrics
//!
//! Thread-safe counters for monitoring deletion runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Clone, Default)]
pub struct DeletionMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    /// Deletion runs started
    requests: AtomicUsize,
    /// Segments handed to deletion runs
    segments_requested: AtomicUsize,
    /// Segments whose metadata record was removed
    segments_removed: AtomicUsize,
    /// Removed segments whose record was already absent
    segments_already_absent: AtomicUsize,
    /// Segments postponed because a placement view still referenced them
    still_referenced: AtomicUsize,
    /// Segments postponed because the store failed to remove them
    store_failures: AtomicUsize,
    /// Removal hook invocations that failed
    hook_failures: AtomicUsize,
    /// Retry batches handed to the scheduler
    retries_scheduled: AtomicUsize,
    /// Stuck-segment alerts raised
    stuck_alerts: AtomicUsize,
    /// Total run duration in milliseconds
    total_duration_ms: AtomicU64,
}

impl DeletionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, segments: usize) {
        self.inner.requests.fetch_add(1, Ordering::Relaxed);
        self.inner
            .segments_requested
            .fetch_add(segments, Ordering::Relaxed);
    }

    pub fn record_removed(&self, already_absent: bool) {
        self.inner.segments_removed.fetch_add(1, Ordering::Relaxed);
        if already_absent {
            self.inner
                .segments_already_absent
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_still_referenced(&self, count: usize) {
        self.inner
            .still_referenced
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_store_failures(&self, count: usize) {
        self.inner.store_failures.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_hook_failure(&self) {
        self.inner.hook_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry_scheduled(&self) {
        self.inner.retries_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stuck_alert(&self) {
        self.inner.stuck_alerts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duration_ms(&self, duration_ms: u64) {
        self.inner
            .total_duration_ms
            .fetch_add(duration_ms, Ordering::Relaxed);
    }

    pub fn requests(&self) -> usize {
        self.inner.requests.load(Ordering::Relaxed)
    }

    pub fn segments_requested(&self) -> usize {
        self.inner.segments_requested.load(Ordering::Relaxed)
    }

    pub fn segments_removed(&self) -> usize {
        self.inner.segments_removed.load(Ordering::Relaxed)
    }

    pub fn segments_already_absent(&self) -> usize {
        self.inner.segments_already_absent.load(Ordering::Relaxed)
    }

    pub fn still_referenced(&self) -> usize {
        self.inner.still_referenced.load(Ordering::Relaxed)
    }

    pub fn store_failures(&self) -> usize {
        self.inner.store_failures.load(Ordering::Relaxed)
    }

    pub fn hook_failures(&self) -> usize {
        self.inner.hook_failures.load(Ordering::Relaxed)
    }

    pub fn retries_scheduled(&self) -> usize {
        self.inner.retries_scheduled.load(Ordering::Relaxed)
    }

    pub fn stuck_alerts(&self) -> usize {
        self.inner.stuck_alerts.load(Ordering::Relaxed)
    }

    pub fn total_duration_ms(&self) -> u64 {
        self.inner.total_duration_ms.load(Ordering::Relaxed)
    }
}
