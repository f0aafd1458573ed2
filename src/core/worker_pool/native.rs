//! Native implementation of `ThreadPoolScheduler` using OS threads.
//!
//! - Workers block on the channel; there is no polling.
//! - Admission uses `try_send`, so `schedule` never blocks the caller.
//! - Dropping the sender unblocks idle workers on shutdown.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::ThreadPoolConfig;
use crate::core::scheduler::run_guarded;
use crate::core::{AsyncError, Characteristics, Promise, Scheduler, Work};

use super::{PoolCounters, PoolError, PoolStats};

/// Work queued for a worker, with the promise reporting its completion.
struct Job {
    id: u64,
    work: Work,
    done: Promise<()>,
}

/// Scheduler running work on dedicated OS threads.
///
/// Interruptible pools skip queued jobs whose promise was cancelled before a
/// worker picked them up. Work that already started always runs to the end.
pub struct ThreadPoolScheduler {
    name: String,
    config: ThreadPoolConfig,
    job_tx: Mutex<Option<Sender<Job>>>,
    counters: Arc<PoolCounters>,
    shutdown: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    job_id_counter: AtomicU64,
}

impl std::fmt::Debug for ThreadPoolScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPoolScheduler")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl ThreadPoolScheduler {
    /// Create a pool named `name`, spawning `config.worker_count` threads.
    ///
    /// # Errors
    ///
    /// - `PoolError::InvalidConfig` if the configuration is invalid
    /// - `PoolError::Internal` if a worker thread cannot be spawned
    pub fn new(name: impl Into<String>, config: ThreadPoolConfig) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;
        let name = name.into();

        let (job_tx, job_rx) = bounded::<Job>(config.max_queue_depth);
        let counters = Arc::new(PoolCounters::default());
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            let worker = spawn_worker(
                worker_id,
                &config,
                job_rx.clone(),
                Arc::clone(&counters),
                Arc::clone(&shutdown),
            )
            .map_err(|e| {
                shutdown.store(true, Ordering::Release);
                PoolError::Internal(format!("failed to spawn worker {worker_id}: {e}"))
            })?;
            workers.push(worker);
        }

        info!(
            pool = %name,
            worker_count = config.worker_count,
            max_queue_depth = config.max_queue_depth,
            interruptible = config.interruptible,
            "thread pool scheduler started"
        );

        Ok(Self {
            name,
            config,
            job_tx: Mutex::new(Some(job_tx)),
            counters,
            shutdown,
            workers: Mutex::new(workers),
            job_id_counter: AtomicU64::new(0),
        })
    }

    /// Enqueue `work`, returning its completion promise or the admission error.
    ///
    /// # Errors
    ///
    /// - `PoolError::QueueFull` if the queue is full
    /// - `PoolError::PoolShutdown` if the pool has been shut down
    pub fn try_schedule(&self, work: Work) -> Result<Promise<()>, PoolError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(PoolError::PoolShutdown);
        }

        let id = self.job_id_counter.fetch_add(1, Ordering::Relaxed);
        let done = Promise::new();
        let job = Job {
            id,
            work,
            done: done.clone(),
        };

        let job_tx = self.job_tx.lock();
        let Some(job_tx) = job_tx.as_ref() else {
            return Err(PoolError::PoolShutdown);
        };

        // Count before sending so a fast worker never underflows the gauge.
        self.counters.queued_jobs.fetch_add(1, Ordering::Relaxed);
        match job_tx.try_send(job) {
            Ok(()) => {
                self.counters.submitted_jobs.fetch_add(1, Ordering::Relaxed);
                debug!(pool = %self.name, job_id = id, "job queued");
                Ok(done)
            }
            Err(TrySendError::Full(_)) => {
                self.counters.queued_jobs.fetch_sub(1, Ordering::Relaxed);
                self.counters.rejected_jobs.fetch_add(1, Ordering::Relaxed);
                warn!(pool = %self.name, "thread pool queue is full");
                Err(PoolError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.counters.queued_jobs.fetch_sub(1, Ordering::Relaxed);
                self.counters.rejected_jobs.fetch_add(1, Ordering::Relaxed);
                Err(PoolError::PoolShutdown)
            }
        }
    }

    /// Current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot(self.config.worker_count)
    }

    /// Pool configuration.
    #[must_use]
    pub const fn config(&self) -> &ThreadPoolConfig {
        &self.config
    }

    /// True once `shutdown` was called or the pool was dropped.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Shut down the pool gracefully.
    ///
    /// Drops the job sender so idle workers exit, then joins each worker with
    /// a timeout of `config.join_timeout_ms`. Workers that do not exit in time
    /// are detached. Jobs still queued are dropped; their promises fail with
    /// `PoolError::PoolShutdown`.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        info!(pool = %self.name, "shutting down thread pool scheduler");

        {
            let mut job_tx = self.job_tx.lock();
            *job_tx = None;
        }

        let timeout = Duration::from_millis(self.config.join_timeout_ms);
        let mut workers = self.workers.lock();
        let worker_count = workers.len();

        for (idx, worker) in workers.drain(..).enumerate() {
            let (tx, rx) = std::sync::mpsc::channel();
            let join_thread = thread::spawn(move || {
                let result = worker.join();
                let _ = tx.send(result.is_ok());
            });

            match rx.recv_timeout(timeout) {
                Ok(true) => debug!(worker_id = idx, "worker joined"),
                Ok(false) => warn!(worker_id = idx, "worker panicked"),
                Err(_) => {
                    warn!(worker_id = idx, "worker did not exit within timeout, detaching");
                    continue;
                }
            }
            let _ = join_thread.join();
        }

        info!(pool = %self.name, worker_count, "thread pool scheduler shut down");
    }
}

impl Scheduler for ThreadPoolScheduler {
    fn schedule(&self, work: Work) -> Promise<()> {
        self.try_schedule(work)
            .unwrap_or_else(|e| Promise::failed(AsyncError::Rejected(e)))
    }

    fn characteristics(&self) -> Characteristics {
        Characteristics {
            interruptible: self.config.interruptible,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ThreadPoolScheduler {
    fn drop(&mut self) {
        // Workers are detached here; `shutdown` is the graceful path.
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            let mut job_tx = self.job_tx.lock();
            *job_tx = None;
            debug!(pool = %self.name, "thread pool dropped without shutdown, detaching workers");
        }
    }
}

/// Spawn one worker thread.
fn spawn_worker(
    worker_id: usize,
    config: &ThreadPoolConfig,
    job_rx: Receiver<Job>,
    counters: Arc<PoolCounters>,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    let interruptible = config.interruptible;
    thread::Builder::new()
        .name(format!("{}-{worker_id}", config.thread_name_prefix))
        .stack_size(config.thread_stack_size)
        .spawn(move || {
            debug!(worker_id, "worker thread started");

            while let Ok(job) = job_rx.recv() {
                counters.queued_jobs.fetch_sub(1, Ordering::Relaxed);

                if shutdown.load(Ordering::Acquire) {
                    job.done
                        .complete_exceptionally(AsyncError::Rejected(PoolError::PoolShutdown));
                    continue;
                }

                if interruptible && job.done.is_done() {
                    counters.skipped_jobs.fetch_add(1, Ordering::Relaxed);
                    debug!(worker_id, job_id = job.id, "skipping cancelled job");
                    continue;
                }

                counters.active_jobs.fetch_add(1, Ordering::Relaxed);
                let outcome = run_guarded(job.work);
                counters.active_jobs.fetch_sub(1, Ordering::Relaxed);

                if outcome.is_ok() {
                    counters.completed_jobs.fetch_add(1, Ordering::Relaxed);
                } else {
                    counters.failed_jobs.fetch_add(1, Ordering::Relaxed);
                }
                job.done.settle(outcome);
            }

            debug!(worker_id, "worker channel closed, exiting");
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn config(workers: usize, depth: usize) -> ThreadPoolConfig {
        ThreadPoolConfig::new()
            .with_worker_count(workers)
            .with_max_queue_depth(depth)
    }

    #[test]
    fn test_runs_work_on_worker_thread() {
        let pool = ThreadPoolScheduler::new("test", config(2, 10)).unwrap();
        let caller = thread::current().id();
        let ran_elsewhere = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran_elsewhere);

        let done = pool.schedule(Box::new(move || {
            flag.store(thread::current().id() != caller, Ordering::SeqCst);
        }));
        assert!(done.wait_blocking_for(Duration::from_secs(5)).is_some());
        assert!(ran_elsewhere.load(Ordering::SeqCst));

        let stats = pool.stats();
        assert_eq!(stats.submitted_jobs, 1);
        assert_eq!(stats.completed_jobs, 1);
        pool.shutdown();
    }

    #[test]
    fn test_queue_full_rejects() {
        let pool = ThreadPoolScheduler::new("tiny", config(1, 1)).unwrap();
        let gate = Arc::new(std::sync::Barrier::new(2));
        let blocker = Arc::clone(&gate);

        // Occupy the only worker, then fill the single queue slot.
        let busy = pool.schedule(Box::new(move || {
            blocker.wait();
        }));
        let mut outcomes = Vec::new();
        for _ in 0..3 {
            outcomes.push(pool.schedule(Box::new(|| {})));
        }
        let rejected = outcomes
            .iter()
            .filter(|p| {
                matches!(p.outcome(), Some(Err(AsyncError::Rejected(PoolError::QueueFull))))
            })
            .count();
        assert!(rejected >= 1);

        gate.wait();
        assert!(busy.wait_blocking_for(Duration::from_secs(5)).is_some());
        pool.shutdown();
    }

    #[test]
    fn test_shutdown_rejects_new_work() {
        let pool = ThreadPoolScheduler::new("closing", config(1, 4)).unwrap();
        pool.shutdown();
        pool.shutdown();
        let done = pool.schedule(Box::new(|| {}));
        assert!(matches!(
            done.outcome(),
            Some(Err(AsyncError::Rejected(PoolError::PoolShutdown)))
        ));
        assert!(pool.is_shutdown());
    }

    #[test]
    fn test_panicking_job_fails_its_promise_only() {
        let pool = ThreadPoolScheduler::new("panics", config(1, 4)).unwrap();
        let failed = pool.schedule(Box::new(|| panic!("job exploded")));
        assert!(matches!(
            failed.wait_blocking_for(Duration::from_secs(5)),
            Some(Err(AsyncError::Panicked(_)))
        ));

        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let ok = pool.schedule(Box::new(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(matches!(ok.wait_blocking_for(Duration::from_secs(5)), Some(Ok(()))));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().failed_jobs, 1);
        pool.shutdown();
    }

    #[test]
    fn test_interruptible_pool_skips_cancelled_jobs() {
        let pool = ThreadPoolScheduler::new("skip", config(1, 8)).unwrap();
        let gate = Arc::new(std::sync::Barrier::new(2));
        let blocker = Arc::clone(&gate);
        let busy = pool.schedule(Box::new(move || {
            blocker.wait();
        }));

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let queued = pool.schedule(Box::new(move || flag.store(true, Ordering::SeqCst)));
        assert!(queued.cancel());

        gate.wait();
        assert!(busy.wait_blocking_for(Duration::from_secs(5)).is_some());
        // The skipped job is consumed before the next one runs.
        let after = pool.schedule(Box::new(|| {}));
        assert!(after.wait_blocking_for(Duration::from_secs(5)).is_some());
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(pool.stats().skipped_jobs, 1);
        pool.shutdown();
    }
}
