//! Atomic counters for the Work Queue and Connection Pipeline, exposed as a
//! point-in-time [`StatsSnapshot`] (§4.6, §7: "a health endpoint (out of
//! scope) can read the stats struct" — the struct itself is in scope).

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Stats {
    queued: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    /// Sum of per-job processing durations in microseconds, used with
    /// `processed` to derive a rolling average.
    total_processing_us: AtomicU64,
    framing_errors: AtomicU64,
    parse_errors: AtomicU64,
}

impl Stats {
    pub fn record_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self, duration: std::time::Duration) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.total_processing_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_framing_error(&self) {
        self.framing_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let processed = self.processed.load(Ordering::Relaxed);
        let total_us = self.total_processing_us.load(Ordering::Relaxed);
        StatsSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            processed,
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            avg_processing_us: if processed == 0 {
                0.0
            } else {
                total_us as f64 / processed as f64
            },
            framing_errors: self.framing_errors.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
        }
    }
}

/// A consistent point-in-time read of [`Stats`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub queued: u64,
    pub processed: u64,
    pub failed: u64,
    pub dropped: u64,
    pub avg_processing_us: f64,
    pub framing_errors: u64,
    pub parse_errors: u64,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rolling_average_tracks_processed_jobs() {
        let stats = Stats::default();
        stats.record_processed(std::time::Duration::from_micros(100));
        stats.record_processed(std::time::Duration::from_micros(300));
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.processed, 2);
        assert!((snapshot.avg_processing_us - 200.0).abs() < 1e-9);
    }

    #[test]
    fn empty_snapshot_has_zero_average() {
        let stats = Stats::default();
        assert_eq!(stats.snapshot().avg_processing_us, 0.0);
    }
}
