//! Logical tasks and the suspend/resume contract.
//!
//! A logical task is a Rust future driven by a [`Scheduler`]. Each task
//! invocation owns one [`Continuation`]: the opaque handle its body uses at
//! every suspension point. Suspending never blocks a thread. The task
//! registers its waker on the awaited promise and returns; when the promise
//! settles (on any thread) the waker asks the task's current scheduler to
//! resume it, passing the resumption through
//! [`Scheduler::contextualize`] first.
//!
//! The wake state machine guarantees a single runner at a time: a wake that
//! arrives while the task is being polled only marks it notified, and the
//! runner polls once more before going idle.
//!
//! ```rust,ignore
//! use prometheus_async::core::{task, Promise};
//!
//! let lookup: Promise<u32> = start_lookup();
//! let total = task::spawn("billing::total", move |cx| async move {
//!     let base = cx.suspend(&lookup).await?;
//!     Ok(base * 2)
//! });
//! ```

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::core::scheduler::panic_message;
use crate::core::{
    AsyncError, CallSite, Outcome, Promise, PromiseFuture, Scheduler, SchedulerResolvers,
};

/// Identifier of one logical task invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(Uuid);

impl TaskId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

const IDLE: u8 = 0;
const SCHEDULED: u8 = 1;
const RUNNING: u8 = 2;
const NOTIFIED: u8 = 3;
const DONE: u8 = 4;

/// State shared between a task's runner and its continuation handle.
struct TaskContext {
    id: TaskId,
    name: String,
    scheduler: RwLock<Arc<dyn Scheduler>>,
    cancelled: AtomicBool,
    /// Set by `switch_to`; the next self-wake goes through the new scheduler.
    migrate: AtomicBool,
    suspensions: AtomicU64,
}

/// Continuation handle of one logical task invocation.
///
/// Created when the task starts and valid until it finishes. Cloning yields
/// another handle to the same invocation.
#[derive(Clone)]
pub struct Continuation {
    context: Arc<TaskContext>,
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("task_id", &self.context.id)
            .field("name", &self.context.name)
            .field("suspensions", &self.suspensions())
            .finish()
    }
}

impl Continuation {
    /// Identifier of the task invocation.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.context.id
    }

    /// Call-site name the task was started with.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.context.name
    }

    /// Scheduler resumptions currently run on.
    #[must_use]
    pub fn scheduler(&self) -> Arc<dyn Scheduler> {
        Arc::clone(&self.context.scheduler.read())
    }

    /// True once the task's promise was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.context.cancelled.load(Ordering::Acquire)
    }

    /// Number of suspension points passed so far.
    #[must_use]
    pub fn suspensions(&self) -> u64 {
        self.context.suspensions.load(Ordering::Relaxed)
    }

    /// Suspend until `promise` settles; resolves to its outcome.
    ///
    /// An error outcome surfaces at the suspension point, so `?` propagates
    /// it like a synchronous error.
    pub fn suspend<T>(&self, promise: &Promise<T>) -> Suspend<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let ordinal = self.context.suspensions.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(task_id = %self.context.id, ordinal, "suspending");
        Suspend {
            inner: promise.wait(),
        }
    }

    /// Move later resumptions to `scheduler` and yield once so the rest of
    /// the task continues there.
    pub fn switch_to(&self, scheduler: Arc<dyn Scheduler>) -> SwitchTo {
        debug!(
            task_id = %self.context.id,
            scheduler = scheduler.name(),
            "switching scheduler"
        );
        *self.context.scheduler.write() = scheduler;
        self.context.migrate.store(true, Ordering::Release);
        SwitchTo { yielded: false }
    }
}

/// Future returned by [`Continuation::suspend`].
#[must_use = "futures do nothing unless polled"]
#[derive(Debug)]
pub struct Suspend<T> {
    inner: PromiseFuture<T>,
}

impl<T> Future for Suspend<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = Outcome<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

/// Future returned by [`Continuation::switch_to`].
#[must_use = "futures do nothing unless polled"]
#[derive(Debug)]
pub struct SwitchTo {
    yielded: bool,
}

impl Future for SwitchTo {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Runner cell for one task; also its waker.
struct TaskCell<T> {
    state: AtomicU8,
    future: Mutex<Option<BoxFuture<'static, Outcome<T>>>>,
    result: Promise<T>,
    context: Arc<TaskContext>,
}

impl<T> TaskCell<T>
where
    T: Send + Sync + 'static,
{
    /// Request a resumption on the task's scheduler.
    fn schedule(self: &Arc<Self>) {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let next = match current {
                IDLE => SCHEDULED,
                RUNNING => NOTIFIED,
                _ => return,
            };
            match self
                .state
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) if next == SCHEDULED => break,
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }

        let scheduler = Arc::clone(&self.context.scheduler.read());
        let cell = Arc::clone(self);
        let resume = scheduler.contextualize(Box::new(move || cell.run()));
        let cell = Arc::clone(self);
        scheduler.schedule(resume).when_complete(move |outcome| {
            if let Err(e) = outcome {
                if !e.is_cancelled() {
                    warn!(task_id = %cell.context.id, error = %e, "resumption failed");
                    cell.abandon(Err(e.clone()));
                }
            }
        });
    }

    fn run(self: Arc<Self>) {
        if self
            .state
            .compare_exchange(SCHEDULED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let waker = Waker::from(Arc::clone(&self));
        let mut cx = Context::from_waker(&waker);
        loop {
            if self.result.is_done() {
                self.abandon(Err(AsyncError::Cancelled));
                return;
            }

            let polled = {
                let mut slot = self.future.lock();
                let Some(future) = slot.as_mut() else {
                    self.state.store(DONE, Ordering::Release);
                    return;
                };
                panic::catch_unwind(AssertUnwindSafe(|| future.poll_unpin(&mut cx)))
            };

            match polled {
                Ok(Poll::Ready(outcome)) => {
                    self.finish(outcome);
                    return;
                }
                Ok(Poll::Pending) => {
                    if self
                        .state
                        .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return;
                    }
                    if self.context.migrate.swap(false, Ordering::AcqRel) {
                        self.state.store(IDLE, Ordering::Release);
                        self.schedule();
                        return;
                    }
                    // Woken while polling: poll again on this resumption.
                    self.state.store(RUNNING, Ordering::Release);
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(task_id = %self.context.id, panic = %message, "task panicked");
                    self.finish(Err(AsyncError::Panicked(message)));
                    return;
                }
            }
        }
    }

    fn finish(&self, outcome: Outcome<T>) {
        self.state.store(DONE, Ordering::Release);
        self.future.lock().take();
        trace!(
            task_id = %self.context.id,
            ok = outcome.is_ok(),
            suspensions = self.context.suspensions.load(Ordering::Relaxed),
            "task finished"
        );
        self.result.settle(outcome);
    }

    /// Drop the body without polling it again.
    fn abandon(&self, outcome: Outcome<T>) {
        self.state.store(DONE, Ordering::Release);
        let dropped = self.future.lock().take();
        drop(dropped);
        if self.result.settle(outcome) {
            debug!(task_id = %self.context.id, "task abandoned");
        }
    }
}

impl<T> Wake for TaskCell<T>
where
    T: Send + Sync + 'static,
{
    fn wake(self: Arc<Self>) {
        self.schedule();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.schedule();
    }
}

/// Builder for starting a logical task.
#[must_use]
pub struct TaskBuilder<'a> {
    site: CallSite,
    resolvers: Option<&'a SchedulerResolvers>,
}

impl fmt::Debug for TaskBuilder<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskBuilder").field("site", &self.site).finish_non_exhaustive()
    }
}

impl<'a> TaskBuilder<'a> {
    /// Task started from the call site `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            site: CallSite::new(name),
            resolvers: None,
        }
    }

    /// Request an explicit scheduler (honored by the explicit resolver, and
    /// used directly when no resolver chain is consulted).
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.site = self.site.with_scheduler(scheduler);
        self
    }

    /// Resolve through `resolvers` instead of the process-wide chain.
    pub const fn resolvers(mut self, resolvers: &'a SchedulerResolvers) -> Self {
        self.resolvers = Some(resolvers);
        self
    }

    /// Start the task; its first step runs on the resolved scheduler.
    pub fn spawn<T, F, Fut>(self, body: F) -> Promise<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce(Continuation) -> Fut,
        Fut: Future<Output = Outcome<T>> + Send + 'static,
    {
        let scheduler = match (self.site.explicit_scheduler(), self.resolvers) {
            (_, Some(resolvers)) => resolvers.resolve(&self.site),
            (Some(explicit), None) => Arc::clone(explicit),
            (None, None) => SchedulerResolvers::global().resolve(&self.site),
        };

        let context = Arc::new(TaskContext {
            id: TaskId::new(),
            name: self.site.name().to_string(),
            scheduler: RwLock::new(scheduler),
            cancelled: AtomicBool::new(false),
            migrate: AtomicBool::new(false),
            suspensions: AtomicU64::new(0),
        });
        let continuation = Continuation {
            context: Arc::clone(&context),
        };
        let future = body(continuation).boxed();

        let cell = Arc::new(TaskCell {
            state: AtomicU8::new(IDLE),
            future: Mutex::new(Some(future)),
            result: Promise::new(),
            context,
        });

        // Cancellation wakes the task so its body is dropped promptly.
        let weak = Arc::downgrade(&cell);
        cell.result.when_complete(move |outcome| {
            if matches!(outcome, Err(AsyncError::Cancelled)) {
                if let Some(cell) = weak.upgrade() {
                    cell.context.cancelled.store(true, Ordering::Release);
                    cell.schedule();
                }
            }
        });

        debug!(
            task_id = %cell.context.id,
            name = %cell.context.name,
            scheduler = cell.context.scheduler.read().name(),
            "task started"
        );
        let result = cell.result.clone();
        cell.schedule();
        result
    }
}

/// Start a task at call site `name`, resolving its scheduler through the
/// process-wide resolver chain.
pub fn spawn<T, F, Fut>(name: impl Into<String>, body: F) -> Promise<T>
where
    T: Send + Sync + 'static,
    F: FnOnce(Continuation) -> Fut,
    Fut: Future<Output = Outcome<T>> + Send + 'static,
{
    TaskBuilder::new(name).spawn(body)
}

/// Start a task running on `scheduler`.
pub fn spawn_on<T, F, Fut>(scheduler: Arc<dyn Scheduler>, body: F) -> Promise<T>
where
    T: Send + Sync + 'static,
    F: FnOnce(Continuation) -> Fut,
    Fut: Future<Output = Outcome<T>> + Send + 'static,
{
    TaskBuilder::new("anonymous").scheduler(scheduler).spawn(body)
}
