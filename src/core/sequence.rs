//! Sequence-style combinators over generators, and the chunked sequence.
//!
//! The combinators wrap a source [`Generator`] in a new generator whose
//! producer pulls from the source. Nothing runs until the resulting generator
//! is advanced.
//!
//! [`ChunkedSequence`] is the lazy counterpart of the quorum combinator: it
//! pulls promises from an iterator in bounded chunks instead of fanning out
//! every operation at once.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use futures::stream::{self, Stream};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::{
    AsyncError, ConfigError, Generator, Outcome, Produced, Promise, SameThreadScheduler,
};

/// Apply `f` to every item.
pub fn map<T, U, F>(mut source: Generator<T>, f: F) -> Generator<U>
where
    T: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
    F: Fn(T) -> U + Send + 'static,
{
    Generator::with_scheduler(SameThreadScheduler::shared(), move |mut y| async move {
        while let Some(item) = source.next_value().await? {
            y.produce_value(f(item)).await?;
        }
        Ok(())
    })
}

/// Keep the items matching `predicate`.
pub fn filter<T, F>(mut source: Generator<T>, predicate: F) -> Generator<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(&T) -> bool + Send + 'static,
{
    Generator::with_scheduler(SameThreadScheduler::shared(), move |mut y| async move {
        while let Some(item) = source.next_value().await? {
            if predicate(&item) {
                y.produce_value(item).await?;
            }
        }
        Ok(())
    })
}

/// First `count` items; the source is closed afterwards.
pub fn take<T>(mut source: Generator<T>, count: usize) -> Generator<T>
where
    T: Clone + Send + Sync + 'static,
{
    Generator::with_scheduler(SameThreadScheduler::shared(), move |mut y| async move {
        for _ in 0..count {
            match source.next_value().await? {
                Some(item) => {
                    y.produce_value(item).await?;
                }
                None => break,
            }
        }
        source.close();
        Ok(())
    })
}

/// Items of every source, one source after another.
pub fn concat<T, I>(sources: I) -> Generator<T>
where
    T: Clone + Send + Sync + 'static,
    I: IntoIterator<Item = Generator<T>>,
{
    let nested: Vec<Produced<T>> = sources.into_iter().map(Produced::Nested).collect();
    Generator::from_produced(nested)
}

/// Drain the generator into a vector.
///
/// # Errors
///
/// The first error raised by the producer.
pub async fn collect<T>(mut source: Generator<T>) -> Result<Vec<T>, AsyncError>
where
    T: Clone + Send + Sync + 'static,
{
    let mut items = Vec::new();
    while let Some(item) = source.next_value().await? {
        items.push(item);
    }
    Ok(items)
}

/// Run `f` on every item.
///
/// # Errors
///
/// The first error raised by the producer.
pub async fn for_each<T, F>(mut source: Generator<T>, mut f: F) -> Result<(), AsyncError>
where
    T: Clone + Send + Sync + 'static,
    F: FnMut(T),
{
    while let Some(item) = source.next_value().await? {
        f(item);
    }
    Ok(())
}

/// View the generator as a `futures::Stream`.
///
/// The stream ends after the first error.
pub fn into_stream<T>(source: Generator<T>) -> impl Stream<Item = Outcome<T>> + Send
where
    T: Clone + Send + Sync + 'static,
{
    stream::unfold(Some(source), |state| async move {
        let mut source = state?;
        match source.next_value().await {
            Ok(Some(item)) => Some((Ok(item), Some(source))),
            Ok(None) => None,
            Err(e) => Some((Err(e), None)),
        }
    })
}

/// Order in which a [`ChunkedSequence`] delivers outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkOrder {
    /// Iterator order. A new chunk is enlisted once the previous one drained.
    #[default]
    Ordered,
    /// Settlement order. The window is topped up to the chunk size after
    /// every delivered outcome.
    CompletionOrder,
}

struct Settled<T> {
    queue: VecDeque<Outcome<T>>,
    signal: Promise<()>,
    /// Set by `cancel`; late outcomes are dropped.
    cancelled: bool,
}

/// Lazily enlists promises from an iterator, at most `chunk_size` in flight.
pub struct ChunkedSequence<T, I> {
    source: I,
    exhausted: bool,
    chunk_size: usize,
    order: ChunkOrder,
    window: VecDeque<Promise<T>>,
    settled: Arc<Mutex<Settled<T>>>,
    in_flight: usize,
}

impl<T, I> fmt::Debug for ChunkedSequence<T, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkedSequence")
            .field("chunk_size", &self.chunk_size)
            .field("order", &self.order)
            .field("in_flight", &self.in_flight)
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

impl<T, I> ChunkedSequence<T, I>
where
    T: Clone + Send + Sync + 'static,
    I: Iterator<Item = Promise<T>>,
{
    /// Sequence over `source` with a window of `chunk_size` promises.
    ///
    /// # Errors
    ///
    /// `ConfigError::Invalid` if `chunk_size` is zero.
    pub fn new<S>(source: S, chunk_size: usize, order: ChunkOrder) -> Result<Self, ConfigError>
    where
        S: IntoIterator<IntoIter = I>,
    {
        if chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be > 0".into()));
        }
        Ok(Self {
            source: source.into_iter(),
            exhausted: false,
            chunk_size,
            order,
            window: VecDeque::new(),
            settled: Arc::new(Mutex::new(Settled {
                queue: VecDeque::new(),
                signal: Promise::new(),
                cancelled: false,
            })),
            in_flight: 0,
        })
    }

    /// Number of enlisted promises whose outcome was not delivered yet.
    #[must_use]
    pub const fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Next outcome, or `None` once the iterator and the window are drained.
    pub async fn next(&mut self) -> Option<Outcome<T>> {
        match self.order {
            ChunkOrder::Ordered => self.next_ordered().await,
            ChunkOrder::CompletionOrder => self.next_settled().await,
        }
    }

    /// Drain every outcome in delivery order.
    pub async fn collect(mut self) -> Vec<Outcome<T>> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.next().await {
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Stop pulling from the iterator and cancel everything in flight.
    ///
    /// Later calls to [`ChunkedSequence::next`] return `None`, even for
    /// promises settling concurrently with the cancellation.
    pub fn cancel(&mut self) {
        self.exhausted = true;
        let (dropped, signal) = {
            let mut settled = self.settled.lock();
            settled.cancelled = true;
            (std::mem::take(&mut settled.queue), settled.signal.clone())
        };
        drop(dropped);
        for promise in self.window.drain(..) {
            promise.cancel();
        }
        self.in_flight = 0;
        signal.complete(());
    }

    fn pull(&mut self) -> Option<Promise<T>> {
        if self.exhausted {
            return None;
        }
        let next = self.source.next();
        if next.is_none() {
            self.exhausted = true;
        }
        next
    }

    async fn next_ordered(&mut self) -> Option<Outcome<T>> {
        if self.window.is_empty() {
            while self.window.len() < self.chunk_size {
                let Some(promise) = self.pull() else { break };
                self.window.push_back(promise);
            }
            self.in_flight = self.window.len();
            if self.in_flight > 0 {
                debug!(enlisted = self.in_flight, "chunk enlisted");
            }
        }
        let promise = self.window.pop_front()?;
        self.in_flight = self.in_flight.saturating_sub(1);
        Some(promise.wait().await)
    }

    fn top_up(&mut self) {
        let mut enlisted = 0;
        while self.in_flight < self.chunk_size {
            let Some(promise) = self.pull() else { break };
            self.in_flight += 1;
            enlisted += 1;
            let settled = Arc::clone(&self.settled);
            let tracked = promise.clone();
            promise.when_complete(move |outcome| {
                let signal = {
                    let mut settled = settled.lock();
                    if settled.cancelled {
                        return;
                    }
                    settled.queue.push_back(outcome.clone());
                    settled.signal.clone()
                };
                signal.complete(());
            });
            self.window.push_back(tracked);
        }
        self.window.retain(|p| !p.is_done());
        if enlisted > 0 {
            debug!(enlisted, in_flight = self.in_flight, "window topped up");
        }
    }

    async fn next_settled(&mut self) -> Option<Outcome<T>> {
        loop {
            self.top_up();
            let signal = {
                let mut settled = self.settled.lock();
                if settled.cancelled {
                    return None;
                }
                if let Some(outcome) = settled.queue.pop_front() {
                    drop(settled);
                    self.in_flight = self.in_flight.saturating_sub(1);
                    return Some(outcome);
                }
                if self.in_flight == 0 {
                    return None;
                }
                if settled.signal.is_done() {
                    settled.signal = Promise::new();
                }
                settled.signal.clone()
            };
            let _ = signal.wait().await;
        }
    }
}
