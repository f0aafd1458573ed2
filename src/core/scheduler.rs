//! Scheduler abstraction deciding where resumed work executes.
//!
//! A [`Scheduler`] runs a unit of [`Work`] somewhere and hands back a
//! [`Promise`] for its completion. Schedulers report whether in-flight work
//! can be interrupted and may wrap resumptions with ambient context through
//! [`Scheduler::contextualize`].

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use crate::core::{AsyncError, Promise};

/// A unit of work handed to a scheduler.
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// Static properties of a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Characteristics {
    /// Cancelling the promise returned by `schedule` withdraws work that has
    /// not started yet (and aborts it where the backend allows). Without this
    /// flag the work still runs to completion; only the promise reports
    /// cancellation.
    pub interruptible: bool,
}

impl Characteristics {
    /// Characteristics of an interruptible scheduler.
    #[must_use]
    pub const fn interruptible() -> Self {
        Self {
            interruptible: true,
        }
    }

    /// Characteristics of a scheduler that always runs accepted work.
    #[must_use]
    pub const fn uninterruptible() -> Self {
        Self {
            interruptible: false,
        }
    }
}

/// Strategy for executing units of work.
pub trait Scheduler: Send + Sync + 'static {
    /// Run `work` somewhere; the returned promise settles when it finished.
    ///
    /// A failed promise means the work was rejected or panicked.
    fn schedule(&self, work: Work) -> Promise<()>;

    /// Scheduler characteristics.
    fn characteristics(&self) -> Characteristics;

    /// Wrap a resumption with ambient state before it is scheduled.
    fn contextualize(&self, resume: Work) -> Work {
        resume
    }

    /// Human-readable identity used in logs and resolver diagnostics.
    fn name(&self) -> &str {
        "scheduler"
    }
}

impl fmt::Debug for dyn Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.name())
            .field("characteristics", &self.characteristics())
            .finish()
    }
}

/// Run `work` on the current thread, converting a panic into a failure.
pub(crate) fn run_guarded(work: Work) -> Result<(), AsyncError> {
    panic::catch_unwind(AssertUnwindSafe(work)).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        tracing::warn!(panic = %message, "scheduled work panicked");
        AsyncError::Panicked(message)
    })
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "opaque panic payload".to_string())
}

/// Runs work synchronously on the calling thread, without context.
///
/// This is the fallback when no resolver has an opinion.
#[derive(Debug, Clone, Copy, Default)]
pub struct SameThreadScheduler;

impl SameThreadScheduler {
    /// Process-wide shared instance.
    #[must_use]
    pub fn shared() -> Arc<dyn Scheduler> {
        static SHARED: OnceLock<Arc<dyn Scheduler>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(Self)))
    }
}

impl Scheduler for SameThreadScheduler {
    fn schedule(&self, work: Work) -> Promise<()> {
        Promise::settled(run_guarded(work))
    }

    fn characteristics(&self) -> Characteristics {
        Characteristics::uninterruptible()
    }

    fn name(&self) -> &str {
        "same-thread"
    }
}

/// Decorator applying an explicit context closure to every resumption.
///
/// Replaces implicit thread-local propagation: whatever the closure captures
/// travels with the resumption across executor hand-offs.
pub struct ContextualScheduler<F> {
    inner: Arc<dyn Scheduler>,
    wrap: F,
}

impl<F> ContextualScheduler<F>
where
    F: Fn(Work) -> Work + Send + Sync + 'static,
{
    /// Wrap `inner`, applying `wrap` after the inner scheduler's own
    /// contextualization.
    pub fn new(inner: Arc<dyn Scheduler>, wrap: F) -> Self {
        Self { inner, wrap }
    }
}

impl<F> Scheduler for ContextualScheduler<F>
where
    F: Fn(Work) -> Work + Send + Sync + 'static,
{
    fn schedule(&self, work: Work) -> Promise<()> {
        self.inner.schedule(work)
    }

    fn characteristics(&self) -> Characteristics {
        self.inner.characteristics()
    }

    fn contextualize(&self, resume: Work) -> Work {
        (self.wrap)(self.inner.contextualize(resume))
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Scheduler that re-enters the `tracing` span current at contextualization
/// time when the resumption runs.
pub struct SpanScheduler {
    inner: Arc<dyn Scheduler>,
}

impl SpanScheduler {
    /// Wrap `inner`.
    pub fn new(inner: Arc<dyn Scheduler>) -> Self {
        Self { inner }
    }
}

impl Scheduler for SpanScheduler {
    fn schedule(&self, work: Work) -> Promise<()> {
        self.inner.schedule(work)
    }

    fn characteristics(&self) -> Characteristics {
        self.inner.characteristics()
    }

    fn contextualize(&self, resume: Work) -> Work {
        let span = tracing::Span::current();
        let resume = self.inner.contextualize(resume);
        Box::new(move || span.in_scope(resume))
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_same_thread_runs_inline() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let done = SameThreadScheduler.schedule(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(done.is_done());
        assert!(!SameThreadScheduler.characteristics().interruptible);
    }

    #[test]
    fn test_same_thread_shared_is_one_instance() {
        assert!(Arc::ptr_eq(&SameThreadScheduler::shared(), &SameThreadScheduler::shared()));
    }

    #[test]
    fn test_same_thread_reports_panic() {
        let done = SameThreadScheduler.schedule(Box::new(|| panic!("kaboom")));
        match done.outcome() {
            Some(Err(AsyncError::Panicked(msg))) => assert_eq!(msg, "kaboom"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_contextual_wraps_resume() {
        let wrapped = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&wrapped);
        let scheduler = ContextualScheduler::new(SameThreadScheduler::shared(), move |work: Work| {
            let seen = Arc::clone(&seen);
            Box::new(move || {
                seen.fetch_add(1, Ordering::SeqCst);
                work();
            }) as Work
        });

        let resume = scheduler.contextualize(Box::new(|| {}));
        scheduler.schedule(resume);
        assert_eq!(wrapped.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.name(), "same-thread");
    }
}
