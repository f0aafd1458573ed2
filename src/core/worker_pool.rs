//! Thread-pool scheduler backed by dedicated OS worker threads.
//!
//! [`ThreadPoolScheduler`] feeds scheduled [`Work`](crate::core::Work) to a
//! fixed set of named worker threads through a bounded queue. Admission is
//! non-blocking: a full queue or a shut-down pool rejects the work and the
//! returned promise fails with [`AsyncError::Rejected`](crate::core::AsyncError::Rejected).
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_async::config::ThreadPoolConfig;
//! use prometheus_async::core::{task, ThreadPoolScheduler};
//!
//! let pool = Arc::new(ThreadPoolScheduler::new(
//!     "cpu",
//!     ThreadPoolConfig::new().with_worker_count(4),
//! )?);
//! let answer = task::spawn_on(pool.clone(), |_cx| async { Ok(42) });
//! ```

#[cfg(not(target_arch = "wasm32"))]
mod native;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Errors raised when a pool refuses or cannot run work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The job queue is full; no more work can be accepted.
    QueueFull,

    /// The pool has been shut down.
    PoolShutdown,

    /// Configuration validation failed.
    InvalidConfig(String),

    /// Internal error (worker thread could not be spawned, etc.).
    Internal(String),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "job queue is full"),
            Self::PoolShutdown => write!(f, "pool has been shut down"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for PoolError {}

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of worker threads.
    pub worker_count: usize,

    /// Jobs currently executing.
    pub active_jobs: u64,

    /// Jobs waiting in the queue.
    pub queued_jobs: u64,

    /// Jobs that ran to completion.
    pub completed_jobs: u64,

    /// Jobs that panicked.
    pub failed_jobs: u64,

    /// Jobs accepted into the queue.
    pub submitted_jobs: u64,

    /// Jobs refused at admission.
    pub rejected_jobs: u64,

    /// Jobs withdrawn because their promise was cancelled before a worker
    /// picked them up.
    pub skipped_jobs: u64,
}

/// Internal counters for pool statistics.
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub active_jobs: AtomicU64,
    pub queued_jobs: AtomicU64,
    pub completed_jobs: AtomicU64,
    pub failed_jobs: AtomicU64,
    pub submitted_jobs: AtomicU64,
    pub rejected_jobs: AtomicU64,
    pub skipped_jobs: AtomicU64,
}

impl PoolCounters {
    /// Snapshot of current statistics.
    pub fn snapshot(&self, worker_count: usize) -> PoolStats {
        PoolStats {
            worker_count,
            active_jobs: self.active_jobs.load(Ordering::Relaxed),
            queued_jobs: self.queued_jobs.load(Ordering::Relaxed),
            completed_jobs: self.completed_jobs.load(Ordering::Relaxed),
            failed_jobs: self.failed_jobs.load(Ordering::Relaxed),
            submitted_jobs: self.submitted_jobs.load(Ordering::Relaxed),
            rejected_jobs: self.rejected_jobs.load(Ordering::Relaxed),
            skipped_jobs: self.skipped_jobs.load(Ordering::Relaxed),
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use native::ThreadPoolScheduler;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_error_display() {
        assert_eq!(PoolError::QueueFull.to_string(), "job queue is full");
        assert_eq!(PoolError::PoolShutdown.to_string(), "pool has been shut down");
        assert_eq!(
            PoolError::InvalidConfig("worker_count must be > 0".into()).to_string(),
            "invalid configuration: worker_count must be > 0"
        );
    }

    #[test]
    fn test_pool_counters_snapshot() {
        let counters = PoolCounters::default();
        counters.submitted_jobs.fetch_add(10, Ordering::Relaxed);
        counters.completed_jobs.fetch_add(5, Ordering::Relaxed);
        counters.skipped_jobs.fetch_add(2, Ordering::Relaxed);

        let stats = counters.snapshot(4);
        assert_eq!(stats.worker_count, 4);
        assert_eq!(stats.submitted_jobs, 10);
        assert_eq!(stats.completed_jobs, 5);
        assert_eq!(stats.skipped_jobs, 2);
        assert_eq!(stats.rejected_jobs, 0);
    }
}
