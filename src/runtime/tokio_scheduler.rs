//! Tokio-backed scheduler and timer promises.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Handle, Runtime};
use tracing::debug;

use crate::core::combinator::timeout_error;
use crate::core::scheduler::run_guarded;
use crate::core::{Characteristics, ConfigError, Promise, Scheduler, Work};

/// Scheduler running work as tasks on a tokio runtime.
///
/// Cancelling the promise returned by `schedule` aborts the spawned tokio
/// task if it has not finished.
pub struct TokioScheduler {
    name: String,
    handle: Handle,
    runtime: Option<Arc<Runtime>>,
}

impl std::fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioScheduler")
            .field("name", &self.name)
            .field("owns_runtime", &self.runtime.is_some())
            .finish()
    }
}

impl TokioScheduler {
    /// Scheduler spawning onto `handle`.
    pub fn new(name: impl Into<String>, handle: Handle) -> Self {
        Self {
            name: name.into(),
            handle,
            runtime: None,
        }
    }

    /// Scheduler spawning onto the runtime the caller is running in.
    ///
    /// # Errors
    ///
    /// `ConfigError::Unavailable` outside a tokio runtime.
    pub fn current(name: impl Into<String>) -> Result<Self, ConfigError> {
        let handle = Handle::try_current().map_err(|e| ConfigError::Unavailable(e.to_string()))?;
        Ok(Self::new(name, handle))
    }

    /// Scheduler owning a new multi-threaded runtime.
    ///
    /// # Errors
    ///
    /// The I/O error raised while building the runtime.
    pub fn with_worker_threads(
        name: impl Into<String>,
        worker_threads: usize,
    ) -> Result<Self, std::io::Error> {
        let name = name.into();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads)
            .thread_name(format!("{name}-tokio"))
            .enable_all()
            .build()?;
        Ok(Self {
            name,
            handle: runtime.handle().clone(),
            runtime: Some(Arc::new(runtime)),
        })
    }

    /// Runtime handle work is spawned onto.
    #[must_use]
    pub const fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Promise completing after `duration`. Cancelling it stops the timer.
    #[must_use]
    pub fn delay(&self, duration: Duration) -> Promise<()> {
        let done = Promise::new();
        let fire = done.clone();
        let timer = self.handle.spawn(async move {
            tokio::time::sleep(duration).await;
            fire.complete(());
        });
        let abort = timer.abort_handle();
        done.when_complete(move |_| abort.abort());
        done
    }

    /// Promise failing with `AsyncError::Timeout` after `duration`.
    ///
    /// Pair with [`with_timeout`](crate::core::combinator::with_timeout).
    #[must_use]
    pub fn timeout<T>(&self, duration: Duration) -> Promise<T>
    where
        T: Send + Sync + 'static,
    {
        let expired = Promise::new();
        let fire = expired.clone();
        let timer = self.handle.spawn(async move {
            tokio::time::sleep(duration).await;
            fire.complete_exceptionally(timeout_error(duration));
        });
        let abort = timer.abort_handle();
        expired.when_complete(move |_| abort.abort());
        expired
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, work: Work) -> Promise<()> {
        let done = Promise::new();
        let settle = done.clone();
        let task = self.handle.spawn(async move {
            settle.settle(run_guarded(work));
        });
        let abort = task.abort_handle();
        done.when_complete(move |outcome| {
            if matches!(outcome, Err(e) if e.is_cancelled()) {
                abort.abort();
            }
        });
        done
    }

    fn characteristics(&self) -> Characteristics {
        Characteristics::interruptible()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        // Blocking runtime drops panic inside async contexts.
        if let Some(runtime) = self.runtime.take().and_then(|rt| Arc::try_unwrap(rt).ok()) {
            debug!(scheduler = %self.name, "shutting down owned tokio runtime");
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{combinator, task, AsyncError};

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_task_on_ambient_runtime() {
        let scheduler: Arc<dyn Scheduler> = Arc::new(TokioScheduler::current("io").unwrap());
        let input: Promise<u32> = Promise::new();
        let awaited = input.clone();
        let result = task::spawn_on(scheduler, move |cx| async move {
            let v = cx.suspend(&awaited).await?;
            Ok(v + 1)
        });
        input.complete(1);
        assert_eq!(result.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_timeout_wins_race() {
        let scheduler = TokioScheduler::current("timers").unwrap();
        let never: Promise<u8> = Promise::new();
        let raced = combinator::with_timeout(
            never.clone(),
            scheduler.timeout(Duration::from_millis(10)),
        );
        assert!(matches!(raced.await, Err(AsyncError::Timeout(_))));
        assert!(never.is_cancelled());
    }

    #[tokio::test]
    async fn test_delay_completes() {
        let scheduler = TokioScheduler::current("timers").unwrap();
        assert!(scheduler.delay(Duration::from_millis(5)).await.is_ok());
    }

    #[test]
    fn test_current_outside_runtime_is_unavailable() {
        assert!(matches!(
            TokioScheduler::current("none"),
            Err(ConfigError::Unavailable(_))
        ));
    }

    #[test]
    fn test_owned_runtime_runs_work() {
        let scheduler = TokioScheduler::with_worker_threads("owned", 1).unwrap();
        let done = scheduler.schedule(Box::new(|| {}));
        assert!(matches!(done.wait_blocking_for(Duration::from_secs(5)), Some(Ok(()))));
        assert!(scheduler.characteristics().interruptible);
    }
}
