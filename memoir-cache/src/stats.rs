//! Per-function call statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of a memoized function's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Calls answered with a stored return value.
    pub hits: u64,
    /// Calls that found nothing servable.
    pub misses: u64,
    /// Calls answered by raising a stored failure.
    pub replayed_failures: u64,
    /// Times the wrapped function actually ran.
    pub executions: u64,
    /// Artifact writes that failed and were skipped.
    pub write_failures: u64,
    /// Artifact reads that failed and were treated as a miss.
    pub read_failures: u64,
}

impl EngineStats {
    /// Fraction of lookups answered from storage (0.0 to 1.0). Replayed
    /// failures count as answered.
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.replayed_failures;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    replayed_failures: AtomicU64,
    executions: AtomicU64,
    write_failures: AtomicU64,
    read_failures: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn replayed(&self) {
        self.replayed_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn executed(&self) {
        self.executions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn write_failed(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn read_failed(&self) {
        self.read_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> EngineStats {
        EngineStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            replayed_failures: self.replayed_failures.load(Ordering::Relaxed),
            executions: self.executions.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        assert_eq!(EngineStats::default().hit_rate(), 0.0);
        let stats = EngineStats {
            hits: 2,
            replayed_failures: 1,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_recorder_snapshot() {
        let recorder = StatsRecorder::default();
        recorder.hit();
        recorder.hit();
        recorder.miss();
        recorder.executed();
        recorder.write_failed();
        let stats = recorder.snapshot();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.executions, 1);
        assert_eq!(stats.write_failures, 1);
        assert_eq!(stats.read_failures, 0);
    }
}
