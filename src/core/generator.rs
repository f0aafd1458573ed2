//! Generator/channel rendezvous between one producer and one consumer.
//!
//! The producer ([`Yielder`]) and consumer ([`Generator`]) take turns. Each
//! turn is handed over through a pair of single-use gates recreated every
//! cycle: the consumer releases the producer gate and suspends on the
//! consumer gate; the producer stores an item, releases the consumer gate and
//! suspends on a fresh producer gate. At any instant at most one side is
//! runnable.
//!
//! ```text
//!   consumer                         producer
//!   next(p) ──release producer gate──►  (resumes, receives p)
//!   (suspended)                         produce(item)
//!   (resumes) ◄──release consumer gate── (suspended)
//!   current() == item
//! ```
//!
//! Produced items may be ready values, pending promises (awaited by the
//! consumer) or nested generators, which are drained to exhaustion before
//! the outer producer gets its next turn.
//!
//! Closing is idempotent and safe from either side or from another thread.
//! A producer suspended in [`Yielder::produce`] is resumed with
//! [`AsyncError::GeneratorClosed`] so its task unwinds through `?`.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use parking_lot::Mutex;
use tracing::trace;

use crate::core::{AsyncError, Promise, SameThreadScheduler, Scheduler, TaskBuilder};

const CONSUMER_TURN: u8 = 0;
const PRODUCER_TURN: u8 = 1;
const DONE: u8 = 2;

/// Item handed from producer to consumer.
pub enum Produced<T, P = ()> {
    /// Ready value.
    Value(T),
    /// Value still being computed; the consumer awaits it.
    Pending(Promise<T>),
    /// Nested generator drained in place.
    Nested(Generator<T, P>),
}

impl<T, P> fmt::Debug for Produced<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(_) => f.write_str("Produced::Value(..)"),
            Self::Pending(p) => f.debug_tuple("Produced::Pending").field(p).finish(),
            Self::Nested(_) => f.write_str("Produced::Nested(..)"),
        }
    }
}

impl<T, P> From<Promise<T>> for Produced<T, P> {
    fn from(promise: Promise<T>) -> Self {
        Self::Pending(promise)
    }
}

impl<T, P> From<Generator<T, P>> for Produced<T, P> {
    fn from(generator: Generator<T, P>) -> Self {
        Self::Nested(generator)
    }
}

struct Cycle<T, P> {
    item: Option<Produced<T, P>>,
    param: Option<P>,
    producer_gate: Promise<()>,
    consumer_gate: Promise<()>,
    error: Option<AsyncError>,
}

struct Shared<T, P> {
    state: AtomicU8,
    cycle: Mutex<Cycle<T, P>>,
}

impl<T, P> Shared<T, P> {
    fn new(state: u8) -> Self {
        Self {
            state: AtomicU8::new(state),
            cycle: Mutex::new(Cycle {
                item: None,
                param: None,
                producer_gate: Promise::new(),
                consumer_gate: Promise::new(),
                error: None,
            }),
        }
    }

    fn is_done(&self) -> bool {
        self.state.load(Ordering::Acquire) == DONE
    }

    /// Consumer side: hand the turn to the producer.
    fn begin_cycle(&self, param: P) -> Result<Option<Promise<()>>, AsyncError> {
        let (release, wait) = {
            let mut cycle = self.cycle.lock();
            match self.state.load(Ordering::Acquire) {
                DONE => return cycle.error.take().map_or(Ok(None), Err),
                PRODUCER_TURN => {
                    return Err(AsyncError::Protocol(
                        "consumer resumed during the producer turn".into(),
                    ))
                }
                _ => {}
            }
            cycle.param = Some(param);
            cycle.consumer_gate = Promise::new();
            self.state.store(PRODUCER_TURN, Ordering::Release);
            (cycle.producer_gate.clone(), cycle.consumer_gate.clone())
        };
        release.complete(());
        Ok(Some(wait))
    }

    /// Consumer side: read what the producer left, after the consumer gate opened.
    fn take_item(&self) -> Result<Option<Produced<T, P>>, AsyncError> {
        let mut cycle = self.cycle.lock();
        if self.state.load(Ordering::Acquire) == DONE {
            return cycle.error.take().map_or(Ok(None), Err);
        }
        cycle
            .item
            .take()
            .map(Some)
            .ok_or_else(|| AsyncError::Protocol("consumer turn without a produced item".into()))
    }

    /// Producer side: store an item and hand the turn back.
    fn offer(&self, item: Produced<T, P>) -> Result<Promise<()>, AsyncError> {
        let (release, wait) = {
            let mut cycle = self.cycle.lock();
            match self.state.load(Ordering::Acquire) {
                DONE => return Err(AsyncError::GeneratorClosed),
                CONSUMER_TURN => {
                    return Err(AsyncError::Protocol(
                        "produce called outside the producer turn".into(),
                    ))
                }
                _ => {}
            }
            cycle.item = Some(item);
            cycle.producer_gate = Promise::new();
            self.state.store(CONSUMER_TURN, Ordering::Release);
            (cycle.consumer_gate.clone(), cycle.producer_gate.clone())
        };
        release.complete(());
        Ok(wait)
    }

    /// Producer side: pick up the consumer's parameter after resuming.
    fn take_param(&self) -> Result<P, AsyncError> {
        let mut cycle = self.cycle.lock();
        if self.state.load(Ordering::Acquire) == DONE {
            return Err(AsyncError::GeneratorClosed);
        }
        cycle
            .param
            .take()
            .ok_or_else(|| AsyncError::Protocol("producer resumed without a parameter".into()))
    }

    /// Producer finished, failed or was abandoned.
    fn finish(&self, error: Option<AsyncError>) {
        let release = {
            let mut cycle = self.cycle.lock();
            if self.state.swap(DONE, Ordering::AcqRel) == DONE {
                return;
            }
            cycle.item = None;
            cycle.error = error.filter(|e| !matches!(e, AsyncError::GeneratorClosed));
            cycle.consumer_gate.clone()
        };
        trace!("generator producer finished");
        release.complete(());
    }

    fn close(&self) -> bool {
        let (producer_gate, consumer_gate, item) = {
            let mut cycle = self.cycle.lock();
            if self.state.swap(DONE, Ordering::AcqRel) == DONE {
                return false;
            }
            cycle.param = None;
            (
                cycle.producer_gate.clone(),
                cycle.consumer_gate.clone(),
                cycle.item.take(),
            )
        };
        drop(item);
        trace!("generator closed");
        producer_gate.complete(());
        consumer_gate.complete(());
        true
    }
}

/// Consumer handle of a generator.
///
/// `P` is the parameter type the consumer passes on every [`Generator::next`]
/// call; the producer receives it as the return value of
/// [`Yielder::produce`]. Dropping the handle closes the generator.
pub struct Generator<T, P = ()> {
    shared: Arc<Shared<T, P>>,
    current: Option<T>,
    delegate: Option<Box<Generator<T, P>>>,
}

impl<T, P> fmt::Debug for Generator<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generator")
            .field("done", &self.shared.is_done())
            .field("has_current", &self.current.is_some())
            .field("delegating", &self.delegate.is_some())
            .finish()
    }
}

impl<T, P> Drop for Generator<T, P> {
    fn drop(&mut self) {
        self.shared.close();
    }
}

impl<T, P> Generator<T, P>
where
    T: Clone + Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
{
    /// Generator driven by a user-authored producer.
    ///
    /// The producer runs as a logical task resolved for the `generator` call
    /// site and starts on the first [`Generator::next`].
    pub fn new<F, Fut>(body: F) -> Self
    where
        F: FnOnce(Yielder<T, P>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), AsyncError>> + Send + 'static,
    {
        Self::spawn(TaskBuilder::new("generator"), body)
    }

    /// Generator whose producer runs on `scheduler`.
    pub fn with_scheduler<F, Fut>(scheduler: Arc<dyn Scheduler>, body: F) -> Self
    where
        F: FnOnce(Yielder<T, P>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), AsyncError>> + Send + 'static,
    {
        Self::spawn(TaskBuilder::new("generator").scheduler(scheduler), body)
    }

    fn spawn<F, Fut>(builder: TaskBuilder<'_>, body: F) -> Self
    where
        F: FnOnce(Yielder<T, P>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), AsyncError>> + Send + 'static,
    {
        let shared = Arc::new(Shared::new(CONSUMER_TURN));
        let start_gate = shared.cycle.lock().producer_gate.clone();
        let mut yielder = Yielder {
            shared: Arc::clone(&shared),
            initial: None,
        };

        let producer = builder.spawn(move |_cx| async move {
            let _ = start_gate.wait().await;
            if !yielder.start() {
                return Ok(());
            }
            body(yielder).await
        });

        let finisher = Arc::clone(&shared);
        producer.when_complete(move |outcome| finisher.finish(outcome.as_ref().err().cloned()));

        Self {
            shared,
            current: None,
            delegate: None,
        }
    }

    /// Generator that is already exhausted.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            shared: Arc::new(Shared::new(DONE)),
            current: None,
            delegate: None,
        }
    }

    /// Generator yielding one ready value.
    #[must_use]
    pub fn of(value: T) -> Self {
        Self::from_produced(std::iter::once(Produced::Value(value)))
    }

    /// Generator yielding the value of one pending promise.
    #[must_use]
    pub fn of_promise(promise: Promise<T>) -> Self {
        Self::from_produced(std::iter::once(Produced::Pending(promise)))
    }

    /// Generator yielding ready values in order.
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self::from_produced(values.into_iter().map(Produced::Value))
    }

    /// Generator yielding a sequence of ready values, promises or nested generators.
    pub fn from_produced<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Produced<T, P>>,
        I::IntoIter: Send + 'static,
    {
        let items = items.into_iter();
        Self::with_scheduler(SameThreadScheduler::shared(), move |mut yielder| async move {
            for item in items {
                yielder.produce(item).await?;
            }
            Ok(())
        })
    }

    /// Generator yielding the items of a stream.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Produced<T, P>> + Send + 'static,
    {
        Self::new(move |mut yielder| async move {
            let mut stream = Box::pin(stream);
            while let Some(item) = stream.next().await {
                yielder.produce(item).await?;
            }
            Ok(())
        })
    }

    /// Advance to the next item, passing `param` to the producer.
    ///
    /// Resolves to `Ok(true)` with [`Generator::current`] set, `Ok(false)`
    /// once exhausted or closed, or the producer's (or awaited promise's)
    /// error.
    pub fn next(&mut self, param: P) -> BoxFuture<'_, Result<bool, AsyncError>> {
        async move {
            self.current = None;
            if self.shared.is_done() {
                // Dropping the delegate closes it.
                self.delegate = None;
            }

            if let Some(delegate) = self.delegate.as_mut() {
                match delegate.next(param.clone()).await {
                    Ok(true) => {
                        self.current = delegate.current.take();
                        return Ok(true);
                    }
                    Ok(false) => self.delegate = None,
                    Err(e) => {
                        self.delegate = None;
                        return Err(e);
                    }
                }
            }

            loop {
                let Some(gate) = self.shared.begin_cycle(param.clone())? else {
                    return Ok(false);
                };
                let _ = gate.wait().await;

                let Some(item) = self.shared.take_item()? else {
                    return Ok(false);
                };
                match item {
                    Produced::Value(value) => {
                        self.current = Some(value);
                        return Ok(true);
                    }
                    Produced::Pending(promise) => {
                        self.current = Some(promise.wait().await?);
                        return Ok(true);
                    }
                    Produced::Nested(mut nested) => {
                        if nested.next(param.clone()).await? {
                            self.current = nested.current.take();
                            self.delegate = Some(Box::new(nested));
                            return Ok(true);
                        }
                    }
                }
            }
        }
        .boxed()
    }

    /// Item produced by the last successful [`Generator::next`].
    #[must_use]
    pub const fn current(&self) -> Option<&T> {
        self.current.as_ref()
    }

    /// Take the current item out.
    pub fn take_current(&mut self) -> Option<T> {
        self.current.take()
    }
}

impl<T> Generator<T, ()>
where
    T: Clone + Send + Sync + 'static,
{
    /// Advance and take the item, `None` once exhausted.
    ///
    /// # Errors
    ///
    /// The producer's error, or the error of an awaited promise.
    pub async fn next_value(&mut self) -> Result<Option<T>, AsyncError> {
        if self.next(()).await? {
            Ok(self.current.take())
        } else {
            Ok(None)
        }
    }
}

impl<T, P> Generator<T, P> {
    /// Close the generator, and the nested generator it is draining; returns
    /// whether this call closed it.
    pub fn close(&self) -> bool {
        if let Some(delegate) = self.delegate.as_ref() {
            delegate.close();
        }
        self.shared.close()
    }

    /// True once exhausted or closed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.shared.is_done()
    }

    /// Cloneable handle able to close the generator from any thread.
    #[must_use]
    pub fn closer(&self) -> GeneratorCloser<T, P> {
        GeneratorCloser {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T, P> FromIterator<T> for Generator<T, P>
where
    T: Clone + Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
{
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_values(iter.into_iter().collect::<Vec<_>>())
    }
}

/// Producer handle of a generator.
pub struct Yielder<T, P = ()> {
    shared: Arc<Shared<T, P>>,
    initial: Option<P>,
}

impl<T, P> fmt::Debug for Yielder<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Yielder")
            .field("closed", &self.shared.is_done())
            .finish_non_exhaustive()
    }
}

impl<T, P> Yielder<T, P>
where
    T: Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    /// Pick up the parameter of the first `next` call. False if closed first.
    fn start(&mut self) -> bool {
        match self.shared.take_param() {
            Ok(param) => {
                self.initial = Some(param);
                true
            }
            Err(_) => false,
        }
    }

    /// Parameter of the `next` call that started the producer.
    pub fn initial_param(&mut self) -> Option<P> {
        self.initial.take()
    }

    /// Hand `item` to the consumer and suspend until its next call.
    ///
    /// Returns the parameter of that call.
    ///
    /// # Errors
    ///
    /// [`AsyncError::GeneratorClosed`] if the generator was closed before or
    /// during the suspension.
    pub async fn produce(&mut self, item: impl Into<Produced<T, P>>) -> Result<P, AsyncError> {
        let gate = self.shared.offer(item.into())?;
        let _ = gate.wait().await;
        self.shared.take_param()
    }

    /// Hand a ready value to the consumer.
    ///
    /// # Errors
    ///
    /// See [`Yielder::produce`].
    pub async fn produce_value(&mut self, value: T) -> Result<P, AsyncError> {
        self.produce(Produced::Value(value)).await
    }

    /// Close the generator from the producer side.
    pub fn close(&self) -> bool {
        self.shared.close()
    }

    /// True once the consumer closed the generator.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_done()
    }
}

/// Cloneable, thread-safe closer for a generator.
pub struct GeneratorCloser<T, P = ()> {
    shared: Arc<Shared<T, P>>,
}

impl<T, P> Clone for GeneratorCloser<T, P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T, P> fmt::Debug for GeneratorCloser<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorCloser")
            .field("closed", &self.shared.is_done())
            .finish()
    }
}

impl<T, P> GeneratorCloser<T, P> {
    /// Close the generator; returns whether this call closed it.
    ///
    /// A nested generator being drained is closed by the consumer's next
    /// [`Generator::next`].
    pub fn close(&self) -> bool {
        self.shared.close()
    }

    /// True once exhausted or closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_done()
    }
}
