//! Scheduler statistics for monitoring and debugging.
//!
//! All counters are atomics so admission tasks and the assembler can update
//! them concurrently without locking.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::FlushTrigger;

/// Live counters owned by one scheduler instance.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    requests_submitted: AtomicU64,
    requests_rejected: AtomicU64,
    requests_completed: AtomicU64,
    requests_failed: AtomicU64,
    batches_dispatched: AtomicU64,
    size_triggered: AtomicU64,
    window_triggered: AtomicU64,
    drain_triggered: AtomicU64,
    batch_failures: AtomicU64,
    correlation_misses: AtomicU64,
    batch_size_sum: AtomicU64,
    total_wait_time_us: AtomicU64,
}

impl SchedulerStats {
    /// Record a successful admission.
    #[inline]
    pub fn record_submitted(&self) {
        self.requests_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an admission refused (stopping, or queue full under reject policy).
    #[inline]
    pub fn record_rejected(&self) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a dispatched batch.
    ///
    /// # Arguments
    /// * `size` - Number of requests in the batch
    /// * `trigger` - What closed the batch window
    /// * `wait_time_us` - Average queue wait of the batch members in microseconds
    pub fn record_batch(&self, size: usize, trigger: FlushTrigger, wait_time_us: u64) {
        self.batches_dispatched.fetch_add(1, Ordering::Relaxed);
        self.batch_size_sum.fetch_add(size as u64, Ordering::Relaxed);
        self.total_wait_time_us.fetch_add(wait_time_us, Ordering::Relaxed);
        let counter = match trigger {
            FlushTrigger::Size => &self.size_triggered,
            FlushTrigger::Window => &self.window_triggered,
            FlushTrigger::Drain => &self.drain_triggered,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a whole-batch collaborator failure.
    #[inline]
    pub fn record_batch_failure(&self) {
        self.batch_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one resolved request.
    #[inline]
    pub fn record_completion(&self, success: bool) {
        if success {
            self.requests_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record an outcome whose id had no registry entry.
    #[inline]
    pub fn record_correlation_miss(&self) {
        self.correlation_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a point-in-time snapshot.
    #[must_use]
    pub fn summary(&self) -> SchedulerStatsSummary {
        let batches = self.batches_dispatched.load(Ordering::Relaxed);
        let size_sum = self.batch_size_sum.load(Ordering::Relaxed);
        let wait_sum = self.total_wait_time_us.load(Ordering::Relaxed);

        SchedulerStatsSummary {
            requests_submitted: self.requests_submitted.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
            requests_completed: self.requests_completed.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            batches_dispatched: batches,
            size_triggered: self.size_triggered.load(Ordering::Relaxed),
            window_triggered: self.window_triggered.load(Ordering::Relaxed),
            drain_triggered: self.drain_triggered.load(Ordering::Relaxed),
            batch_failures: self.batch_failures.load(Ordering::Relaxed),
            correlation_misses: self.correlation_misses.load(Ordering::Relaxed),
            avg_batch_size: if batches > 0 {
                (size_sum as f64) / (batches as f64)
            } else {
                0.0
            },
            avg_wait_time_us: if batches > 0 { wait_sum / batches } else { 0 },
        }
    }
}

/// Non-atomic copy of [`SchedulerStats`] for reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerStatsSummary {
    pub requests_submitted: u64,
    pub requests_rejected: u64,
    pub requests_completed: u64,
    pub requests_failed: u64,
    pub batches_dispatched: u64,
    pub size_triggered: u64,
    pub window_triggered: u64,
    pub drain_triggered: u64,
    pub batch_failures: u64,
    pub correlation_misses: u64,
    /// Average batch size (floating point for precision).
    pub avg_batch_size: f64,
    /// Average per-batch queue wait in microseconds.
    pub avg_wait_time_us: u64,
}
