//! Per-run counters.
//!
//! Every pool run owns one [`PoolStats`], shared by `Arc` with the job source,
//! the workers, and the coordinator. Nothing here is global: two concurrent
//! runs never observe each other's counts.

use core::fmt;
use portable_atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct PoolStats {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    workers_exited: AtomicU64,
    discarded: AtomicU64,
    source_exhausted: AtomicBool,
}

impl PoolStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_panicked(&self) {
        self.panicked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_worker_exit(&self) {
        self.workers_exited.fetch_add(1, Ordering::Relaxed);
    }

    /// A finished job whose result never reached the sink.
    pub(crate) fn record_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// The job source ran out of jobs and every one of them was submitted.
    pub(crate) fn record_source_exhausted(&self) {
        self.source_exhausted.store(true, Ordering::Release);
    }

    /// Whether every job the source produced was submitted.
    pub fn source_exhausted(&self) -> bool {
        self.source_exhausted.load(Ordering::Acquire)
    }

    /// Whether every job the source produced has a published result. Only
    /// meaningful once all workers have exited.
    pub(crate) fn all_delivered(&self) -> bool {
        let snapshot = self.snapshot();
        self.source_exhausted()
            && snapshot.discarded == 0
            && snapshot.processed() == snapshot.submitted
    }

    /// Takes a point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            workers_exited: self.workers_exited.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

/// A copy of [`PoolStats`] at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Jobs accepted by the dispatch queue.
    pub submitted: u64,
    pub succeeded: u64,
    /// Jobs whose handler returned an error.
    pub failed: u64,
    /// Jobs whose handler panicked.
    pub panicked: u64,
    pub workers_exited: u64,
    /// Finished jobs whose result was dropped because the run stopped
    /// before it could be published.
    pub discarded: u64,
}

impl StatsSnapshot {
    /// Jobs that produced a result, successful or not.
    pub const fn processed(&self) -> u64 {
        self.succeeded + self.failed + self.panicked
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "submitted={} succeeded={} failed={} panicked={} discarded={}",
            self.submitted, self.succeeded, self.failed, self.panicked, self.discarded
        )
    }
}
