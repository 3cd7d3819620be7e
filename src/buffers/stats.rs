//! Buffer pool usage and statistics tracking

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time usage of a pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolUsage {
    /// Buffer containers created so far
    pub buffers_in_pool: usize,
    /// Buffers whose aggregate reference count is above zero
    pub buffers_with_non_zero_reference_count: usize,
    /// Memory managed by the pool; `None` for per-acquisition heap or partition pools
    pub memory_in_pool: Option<usize>,
    /// Payload bytes currently bound to buffers
    pub memory_allocated: usize,
    /// Sum of used data sizes
    pub memory_in_use: usize,
    /// Largest contiguous free range, where the pool manages a range
    pub largest_free_memory_block: Option<usize>,
}

impl PoolUsage {
    /// Fraction of buffers referenced (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        if self.buffers_in_pool == 0 {
            return 0.0;
        }
        self.buffers_with_non_zero_reference_count as f64 / self.buffers_in_pool as f64
    }
}

/// Acquisition statistics for monitoring a pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Successful `get_buffer` calls
    pub acquisitions: u64,
    /// Successful `release_buffer` calls
    pub releases: u64,
    /// Acquisitions that failed for lack of a buffer or memory
    pub failures: u64,
    /// Waits cut short by an abort or a liveness check
    pub aborts: u64,
    /// Peak number of buffers in use simultaneously
    pub peak_in_use: usize,
}

impl PoolStats {
    /// Calculate acquisition success rate (0.0 to 1.0)
    pub fn success_rate(&self) -> f64 {
        let attempts = self.acquisitions + self.failures + self.aborts;
        if attempts == 0 {
            return 1.0;
        }
        self.acquisitions as f64 / attempts as f64
    }

    /// Get a summary string of the statistics
    pub fn summary(&self) -> String {
        format!(
            "PoolStats {{ acquisitions: {}, releases: {}, failures: {}, aborts: {}, \
             peak: {}, success_rate: {:.2}% }}",
            self.acquisitions,
            self.releases,
            self.failures,
            self.aborts,
            self.peak_in_use,
            self.success_rate() * 100.0
        )
    }
}

/// Thread-safe counters shared by a pool and its buffers
#[derive(Debug, Default)]
pub struct PoolCounters {
    memory_allocated: AtomicUsize,
    memory_in_use: AtomicUsize,
    acquisitions: AtomicU64,
    releases: AtomicU64,
    failures: AtomicU64,
    aborts: AtomicU64,
    peak_in_use: AtomicUsize,
}

impl PoolCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful acquisition with `in_use` buffers now out
    pub fn record_acquisition(&self, in_use: usize) {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        self.peak_in_use.fetch_max(in_use, Ordering::Relaxed);
    }

    pub fn record_release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abort(&self) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_allocated(&self, bytes: usize) {
        self.memory_allocated.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn sub_allocated(&self, bytes: usize) {
        self.memory_allocated.fetch_sub(bytes, Ordering::Relaxed);
    }

    /// Apply a change of used data size
    pub fn adjust_in_use(&self, old: usize, new: usize) {
        if new > old {
            self.memory_in_use.fetch_add(new - old, Ordering::Relaxed);
        } else {
            self.memory_in_use.fetch_sub(old - new, Ordering::Relaxed);
        }
    }

    pub fn memory_allocated(&self) -> usize {
        self.memory_allocated.load(Ordering::Relaxed)
    }

    pub fn memory_in_use(&self) -> usize {
        self.memory_in_use.load(Ordering::Relaxed)
    }

    /// Get current statistics snapshot
    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            aborts: self.aborts.load(Ordering::Relaxed),
            peak_in_use: self.peak_in_use.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_snapshot() {
        let counters = PoolCounters::new();
        counters.record_acquisition(1);
        counters.record_acquisition(2);
        counters.record_release();
        counters.record_failure();
        counters.record_acquisition(2);

        let stats = counters.snapshot();
        assert_eq!(stats.acquisitions, 3);
        assert_eq!(stats.releases, 1);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.peak_in_use, 2);
        assert!((stats.success_rate() - 0.75).abs() < f64::EPSILON);
        assert!(stats.summary().contains("acquisitions: 3"));
    }

    #[test]
    fn test_memory_counters() {
        let counters = PoolCounters::new();
        counters.add_allocated(4096);
        counters.adjust_in_use(0, 1000);
        counters.adjust_in_use(1000, 200);
        assert_eq!(counters.memory_allocated(), 4096);
        assert_eq!(counters.memory_in_use(), 200);

        counters.sub_allocated(4096);
        assert_eq!(counters.memory_allocated(), 0);
    }

    #[test]
    fn test_usage_utilization() {
        let usage = PoolUsage {
            buffers_in_pool: 4,
            buffers_with_non_zero_reference_count: 1,
            ..Default::default()
        };
        assert!((usage.utilization() - 0.25).abs() < f64::EPSILON);
        assert_eq!(PoolUsage::default().utilization(), 0.0);
    }
}
