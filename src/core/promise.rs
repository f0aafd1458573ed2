//! Single-assignment promise with exactly-once completion callbacks.
//!
//! A [`Promise`] starts pending and transitions at most once to succeeded,
//! failed or cancelled. The transition is decided by a single atomic
//! compare-and-set; the loser of any race observes `false` and nothing else
//! changes. Callbacks registered with [`Promise::when_complete`] fire exactly
//! once: immediately on the registering thread if the promise is already
//! terminal, otherwise on whichever thread performs the transition.
//!
//! ```
//! use prometheus_async::core::Promise;
//!
//! let promise = Promise::new();
//! let observer = promise.clone();
//! observer.when_complete(|outcome| assert_eq!(outcome.as_ref().ok(), Some(&7)));
//!
//! assert!(promise.complete(7));
//! assert!(!promise.complete(8));
//! ```

use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::task::AtomicWaker;
use parking_lot::{Condvar, Mutex};

use crate::core::AsyncError;

/// Terminal value of a promise.
pub type Outcome<T> = Result<T, AsyncError>;

type Callback<T> = Box<dyn FnOnce(&Outcome<T>) + Send + 'static>;

const PENDING: u8 = 0;
const COMPLETING: u8 = 1;
const SETTLED: u8 = 2;

struct Shared<T> {
    /// Terminal-transition guard.
    state: AtomicU8,
    outcome: OnceLock<Outcome<T>>,
    /// `None` once the callbacks were drained by the completing thread.
    callbacks: Mutex<Option<Vec<Callback<T>>>>,
}

/// Asynchronous single-assignment result container.
///
/// Cloning a promise yields another handle to the same cell.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.shared.outcome.get() {
            None => "pending",
            Some(Ok(_)) => "succeeded",
            Some(Err(AsyncError::Cancelled)) => "cancelled",
            Some(Err(_)) => "failed",
        };
        f.debug_struct("Promise").field("state", &state).finish()
    }
}

impl<T> Default for Promise<T>
where
    T: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Promise<T>
where
    T: Send + Sync + 'static,
{
    /// Create a pending promise.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: AtomicU8::new(PENDING),
                outcome: OnceLock::new(),
                callbacks: Mutex::new(Some(Vec::new())),
            }),
        }
    }

    /// Promise already succeeded with `value`.
    #[must_use]
    pub fn completed(value: T) -> Self {
        Self::settled(Ok(value))
    }

    /// Promise already failed with `error`.
    #[must_use]
    pub fn failed(error: AsyncError) -> Self {
        Self::settled(Err(error))
    }

    /// Promise already cancelled.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::settled(Err(AsyncError::Cancelled))
    }

    /// Promise already holding `outcome`.
    #[must_use]
    pub fn settled(outcome: Outcome<T>) -> Self {
        let promise = Self::new();
        promise.settle(outcome);
        promise
    }

    /// Attempt the pending → succeeded transition.
    ///
    /// Returns whether this call performed the transition.
    pub fn complete(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Attempt the pending → failed transition.
    ///
    /// Passing [`AsyncError::Cancelled`] is equivalent to [`Promise::cancel`].
    pub fn complete_exceptionally(&self, error: AsyncError) -> bool {
        self.settle(Err(error))
    }

    /// Attempt the pending → cancelled transition.
    pub fn cancel(&self) -> bool {
        self.settle(Err(AsyncError::Cancelled))
    }

    /// Attempt to move the promise into `outcome`.
    ///
    /// Late attempts are rejected and reported at trace level.
    pub fn settle(&self, outcome: Outcome<T>) -> bool {
        let shared = &self.shared;
        if shared
            .state
            .compare_exchange(PENDING, COMPLETING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::trace!("late completion attempt ignored");
            return false;
        }

        // Only the CAS winner reaches this point, so the cell is still empty.
        let _ = shared.outcome.set(outcome);
        shared.state.store(SETTLED, Ordering::Release);

        let callbacks = shared.callbacks.lock().take();
        if let (Some(callbacks), Some(outcome)) = (callbacks, shared.outcome.get()) {
            for callback in callbacks {
                callback(outcome);
            }
        }
        true
    }

    /// Register a callback receiving the terminal outcome exactly once.
    ///
    /// Runs synchronously if the promise is already terminal.
    pub fn when_complete<F>(&self, callback: F)
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        {
            let mut callbacks = self.shared.callbacks.lock();
            if let Some(pending) = callbacks.as_mut() {
                pending.push(Box::new(callback));
                return;
            }
        }
        // Drained: the outcome was stored before the list was taken.
        if let Some(outcome) = self.shared.outcome.get() {
            callback(outcome);
        }
    }

    /// Terminal outcome, if any.
    #[must_use]
    pub fn outcome(&self) -> Option<&Outcome<T>> {
        self.shared.outcome.get()
    }

    /// True once the promise reached any terminal state.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.shared.outcome.get().is_some()
    }

    /// True if the promise ended cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.shared.outcome.get(), Some(Err(AsyncError::Cancelled)))
    }

    /// True if the promise ended with a non-cancellation error.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.shared.outcome.get(), Some(Err(e)) if !e.is_cancelled())
    }

    /// True if `other` is a handle to the same cell.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Derived promise completing with `f` applied to this promise's value.
    ///
    /// Cancelling the derived promise cancels this one, but only when the
    /// derived promise's own cancel transition succeeded.
    pub fn map<U, F>(&self, f: F) -> Promise<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> U + Send + 'static,
    {
        self.and_then(move |value| Ok(f(value)))
    }

    /// Derived promise completing with the fallible projection `f`.
    pub fn and_then<U, F>(&self, f: F) -> Promise<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> Outcome<U> + Send + 'static,
    {
        let derived = Promise::new();
        let source = self.clone();
        derived.when_complete(move |outcome: &Outcome<U>| {
            if matches!(outcome, Err(AsyncError::Cancelled)) {
                source.cancel();
            }
        });
        let target = derived.clone();
        self.when_complete(move |outcome| {
            let next = match outcome {
                Ok(value) => f(value),
                Err(e) => Err(e.clone()),
            };
            target.settle(next);
        });
        derived
    }
}

impl<T> Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Future resolving to a copy of the terminal outcome.
    #[must_use]
    pub fn wait(&self) -> PromiseFuture<T> {
        PromiseFuture {
            promise: self.clone(),
            waker: None,
        }
    }

    /// Block the calling thread until the promise settles.
    ///
    /// Meant for threads outside any scheduler (tests, `main`); a logical
    /// task suspends with [`Continuation::suspend`](crate::core::Continuation::suspend) instead.
    #[must_use]
    pub fn wait_blocking(&self) -> Outcome<T> {
        let slot = self.blocking_slot();
        let (outcome, ready) = slot.as_ref();
        let mut outcome = outcome.lock();
        while outcome.is_none() {
            ready.wait(&mut outcome);
        }
        outcome.take().unwrap_or(Err(AsyncError::Cancelled))
    }

    /// Like [`Promise::wait_blocking`], giving up after `timeout`.
    #[must_use]
    pub fn wait_blocking_for(&self, timeout: Duration) -> Option<Outcome<T>> {
        let slot = self.blocking_slot();
        let (outcome, ready) = slot.as_ref();
        let mut outcome = outcome.lock();
        if outcome.is_none() {
            let _ = ready.wait_while_for(&mut outcome, |o| o.is_none(), timeout);
        }
        outcome.take()
    }

    fn blocking_slot(&self) -> Arc<(Mutex<Option<Outcome<T>>>, Condvar)> {
        let slot = Arc::new((Mutex::new(None), Condvar::new()));
        let notify = Arc::clone(&slot);
        self.when_complete(move |outcome| {
            let (cell, ready) = notify.as_ref();
            *cell.lock() = Some(outcome.clone());
            ready.notify_all();
        });
        slot
    }
}

impl<T> IntoFuture for Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = Outcome<T>;
    type IntoFuture = PromiseFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        PromiseFuture {
            promise: self,
            waker: None,
        }
    }
}

/// Future view of a [`Promise`].
///
/// The first pending poll registers one completion callback; later polls
/// only refresh the stored waker.
#[must_use = "futures do nothing unless polled"]
pub struct PromiseFuture<T> {
    promise: Promise<T>,
    waker: Option<Arc<AtomicWaker>>,
}

impl<T> fmt::Debug for PromiseFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromiseFuture")
            .field("promise", &self.promise)
            .finish_non_exhaustive()
    }
}

impl<T> Future for PromiseFuture<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(outcome) = this.promise.outcome() {
            return Poll::Ready(outcome.clone());
        }

        if let Some(waker) = &this.waker {
            waker.register(cx.waker());
        } else {
            let waker = Arc::new(AtomicWaker::new());
            waker.register(cx.waker());
            let notify = Arc::clone(&waker);
            this.promise.when_complete(move |_| notify.wake());
            this.waker = Some(waker);
        }

        match this.promise.outcome() {
            Some(outcome) => Poll::Ready(outcome.clone()),
            None => Poll::Pending,
        }
    }
}
