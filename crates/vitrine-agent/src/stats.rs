//! Aggregate preview counters
//!
//! These sit on every start/stop hot path, so they are lock-free atomics
//! rather than fields under the session registry lock.

use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Lock-free counters for the container preview tier
#[derive(Debug, Default)]
pub struct PreviewStats {
    created: AtomicU64,
    active: AtomicI64,
    max_concurrent: AtomicI64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    build_ms: AtomicU64,
    run_ms: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub total_created: u64,
    pub active: i64,
    pub max_concurrent: i64,
    pub failed: u64,
    pub timed_out: u64,
    pub total_build_ms: u64,
    pub total_run_ms: u64,
}

impl PreviewStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successfully created session, advancing the high-water mark
    pub fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
        let current = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        // CAS loop: another creator may race us to a higher mark
        let mut max = self.max_concurrent.load(Ordering::SeqCst);
        while current > max {
            match self.max_concurrent.compare_exchange(
                max,
                current,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(observed) => max = observed,
            }
        }
    }

    pub fn record_stopped(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timed_out(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_build_ms(&self, ms: u64) {
        self.build_ms.fetch_add(ms, Ordering::Relaxed);
    }

    pub fn add_run_ms(&self, ms: u64) {
        self.run_ms.fetch_add(ms, Ordering::Relaxed);
    }

    pub fn active(&self) -> i64 {
        self.active.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_created: self.created.load(Ordering::Relaxed),
            active: self.active.load(Ordering::SeqCst),
            max_concurrent: self.max_concurrent.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            total_build_ms: self.build_ms.load(Ordering::Relaxed),
            total_run_ms: self.run_ms.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_create_stop_cycle() {
        let stats = PreviewStats::new();
        stats.record_created();
        stats.record_created();
        stats.record_stopped();

        let snap = stats.snapshot();
        assert_eq!(snap.total_created, 2);
        assert_eq!(snap.active, 1);
        assert_eq!(snap.max_concurrent, 2);
    }

    #[test]
    fn test_failed_and_timed_out() {
        let stats = PreviewStats::new();
        stats.record_failed();
        stats.record_timed_out();
        stats.add_build_ms(1200);
        stats.add_run_ms(300);

        let snap = stats.snapshot();
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.timed_out, 1);
        assert_eq!(snap.total_build_ms, 1200);
        assert_eq!(snap.total_run_ms, 300);
    }

    #[tokio::test]
    async fn test_max_concurrent_under_contention() {
        let stats = Arc::new(PreviewStats::new());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let stats = Arc::clone(&stats);
            handles.push(tokio::spawn(async move {
                stats.record_created();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snap = stats.snapshot();
        assert_eq!(snap.total_created, 32);
        assert_eq!(snap.active, 32);
        assert_eq!(snap.max_concurrent, 32);
    }
}
