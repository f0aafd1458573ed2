//! Quorum combinators: M-of-N completion over promises.
//!
//! [`combine`] fans N input promises into one output promise that succeeds
//! once `min_results` inputs succeeded, or fails once `max_errors + 1`
//! inputs failed, whichever happens first. The named variants cover the
//! common shapes:
//!
//! - [`all`]: every input must succeed (`min_results = N`, no errors tolerated)
//! - [`any`]: first success wins; fails only when every input failed
//! - [`any_strict`]: first settled input decides
//! - [`at_least`] / [`at_least_strict`]: k-of-N, tolerant or strict
//!
//! # Slots and counters
//!
//! Results and errors live in pre-sized slots addressed by input index. Each
//! slot is written by at most one completion callback, so slots need no lock;
//! only the counters and the terminal guard are atomic. A success first
//! reserves a position (`results_reserved`), writes its slot, then publishes
//! (`results_stored`). The callback whose publish makes the stored count
//! reach the threshold races for the terminal guard, so the snapshot always
//! contains every counted slot.
//!
//! # Reported errors
//!
//! A failed combinator surfaces exactly `max_errors + 1` causes: with zero
//! tolerance one cause is still reported.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::{AsyncError, ConfigError, MultitargetError, Outcome, Promise};

/// Quorum parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombineOptions {
    /// Successes required.
    pub min_results: usize,
    /// Errors tolerated before giving up. Clamped to `N - min_results`.
    pub max_errors: usize,
    /// Cancel unsettled inputs once the output settles.
    pub cancel_remaining: bool,
}

impl CombineOptions {
    /// Require `min_results` successes, tolerating `max_errors` failures.
    #[must_use]
    pub const fn new(min_results: usize, max_errors: usize) -> Self {
        Self {
            min_results,
            max_errors,
            cancel_remaining: true,
        }
    }

    /// Set whether unsettled inputs are cancelled.
    #[must_use]
    pub const fn with_cancel_remaining(mut self, cancel_remaining: bool) -> Self {
        self.cancel_remaining = cancel_remaining;
        self
    }
}

struct QuorumState<T> {
    inputs: Vec<Promise<T>>,
    results: Vec<OnceLock<T>>,
    errors: Vec<OnceLock<AsyncError>>,
    results_reserved: AtomicUsize,
    results_stored: AtomicUsize,
    errors_reserved: AtomicUsize,
    errors_stored: AtomicUsize,
    min_results: usize,
    max_errors: usize,
    cancel_remaining: bool,
    done: AtomicBool,
    output: Promise<Vec<T>>,
}

impl<T> QuorumState<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn on_result(&self, index: usize, value: &T) {
        let position = self.results_reserved.fetch_add(1, Ordering::AcqRel) + 1;
        if position > self.min_results {
            return;
        }
        let _ = self.results[index].set(value.clone());
        let stored = self.results_stored.fetch_add(1, Ordering::AcqRel) + 1;
        if stored == self.min_results && self.claim_terminal() {
            let snapshot: Vec<T> = self
                .results
                .iter()
                .filter_map(|slot| slot.get().cloned())
                .collect();
            debug!(
                inputs = self.inputs.len(),
                min_results = self.min_results,
                "quorum reached"
            );
            if self.cancel_remaining {
                self.cancel_unsettled();
            }
            self.output.complete(snapshot);
        }
    }

    fn on_error(&self, index: usize, error: &AsyncError) {
        let limit = self.max_errors + 1;
        let position = self.errors_reserved.fetch_add(1, Ordering::AcqRel) + 1;
        if position > limit {
            return;
        }
        let _ = self.errors[index].set(error.clone());
        let stored = self.errors_stored.fetch_add(1, Ordering::AcqRel) + 1;
        if stored == limit && self.claim_terminal() {
            let causes: Vec<Option<AsyncError>> =
                self.errors.iter().map(|slot| slot.get().cloned()).collect();
            debug!(
                inputs = self.inputs.len(),
                max_errors = self.max_errors,
                "quorum failed"
            );
            if self.cancel_remaining {
                self.cancel_unsettled();
            }
            self.output
                .complete_exceptionally(MultitargetError::new(causes).into());
        }
    }

    fn claim_terminal(&self) -> bool {
        self.done
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Cancel inputs with neither a recorded result nor a recorded error.
    fn cancel_unsettled(&self) {
        for (index, input) in self.inputs.iter().enumerate() {
            if self.results[index].get().is_none() && self.errors[index].get().is_none() {
                input.cancel();
            }
        }
    }
}

/// Combine `inputs` under a quorum policy.
///
/// The output succeeds with exactly `min_results` values in input-index
/// order, or fails with a [`MultitargetError`] whose slots are aligned with
/// `inputs`. Cancelling the output cancels every input without a recorded
/// result or error.
///
/// # Errors
///
/// `ConfigError::InvalidQuorum` when `min_results` exceeds the number of
/// inputs.
pub fn combine<T>(
    inputs: Vec<Promise<T>>,
    options: CombineOptions,
) -> Result<Promise<Vec<T>>, ConfigError>
where
    T: Clone + Send + Sync + 'static,
{
    let total = inputs.len();
    if options.min_results > total {
        return Err(ConfigError::InvalidQuorum {
            min_results: options.min_results,
            inputs: total,
        });
    }
    if options.min_results == 0 {
        if options.cancel_remaining {
            for input in &inputs {
                input.cancel();
            }
        }
        return Ok(Promise::completed(Vec::new()));
    }
    if total == 1 {
        return Ok(passthrough(&inputs[0]));
    }

    let state = Arc::new(QuorumState {
        results: (0..total).map(|_| OnceLock::new()).collect(),
        errors: (0..total).map(|_| OnceLock::new()).collect(),
        results_reserved: AtomicUsize::new(0),
        results_stored: AtomicUsize::new(0),
        errors_reserved: AtomicUsize::new(0),
        errors_stored: AtomicUsize::new(0),
        min_results: options.min_results,
        max_errors: options.max_errors.min(total - options.min_results),
        cancel_remaining: options.cancel_remaining,
        done: AtomicBool::new(false),
        output: Promise::new(),
        inputs,
    });

    let output = state.output.clone();

    // Output cancellation fans out to unsettled inputs only.
    let weak = Arc::downgrade(&state);
    output.when_complete(move |outcome| {
        if matches!(outcome, Err(AsyncError::Cancelled)) {
            if let Some(state) = weak.upgrade() {
                if state.claim_terminal() {
                    debug!(inputs = state.inputs.len(), "quorum cancelled");
                }
                state.cancel_unsettled();
            }
        }
    });

    for (index, input) in state.inputs.iter().enumerate() {
        let state = Arc::clone(&state);
        input.when_complete(move |outcome| match outcome {
            Ok(value) => state.on_result(index, value),
            Err(error) => state.on_error(index, error),
        });
    }

    Ok(output)
}

/// Single input: success as a one-element vector, failure as an aggregate of one.
fn passthrough<T>(input: &Promise<T>) -> Promise<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
{
    input.and_then(|value| Ok(vec![value.clone()])).map_error(|error| {
        if error.is_cancelled() {
            error
        } else {
            MultitargetError::single(error).into()
        }
    })
}

trait MapError<T> {
    fn map_error<F>(self, f: F) -> Promise<T>
    where
        F: FnOnce(AsyncError) -> AsyncError + Send + 'static;
}

impl<T> MapError<T> for Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn map_error<F>(self, f: F) -> Promise<T>
    where
        F: FnOnce(AsyncError) -> AsyncError + Send + 'static,
    {
        let derived = Promise::new();
        let source = self.clone();
        derived.when_complete(move |outcome: &Outcome<T>| {
            if matches!(outcome, Err(AsyncError::Cancelled)) {
                source.cancel();
            }
        });
        let target = derived.clone();
        self.when_complete(move |outcome| {
            target.settle(outcome.clone().map_err(f));
        });
        derived
    }
}

/// Every input must succeed; the first failure fails the output and cancels
/// the rest.
pub fn all<T>(inputs: Vec<Promise<T>>) -> Promise<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
{
    let total = inputs.len();
    combine(inputs, CombineOptions::new(total, 0))
        .unwrap_or_else(|e| Promise::failed(AsyncError::msg(e)))
}

/// First success wins; fails with every cause once all inputs failed.
///
/// # Errors
///
/// `ConfigError::InvalidQuorum` for an empty input list.
pub fn any<T>(inputs: Vec<Promise<T>>) -> Result<Promise<T>, ConfigError>
where
    T: Clone + Send + Sync + 'static,
{
    let total = inputs.len();
    let combined = combine(inputs, CombineOptions::new(1, total.saturating_sub(1)))?;
    Ok(unwrap_single(&combined, total > 1))
}

/// First settled input decides: its value, or its error unwrapped.
///
/// # Errors
///
/// `ConfigError::InvalidQuorum` for an empty input list.
pub fn any_strict<T>(inputs: Vec<Promise<T>>) -> Result<Promise<T>, ConfigError>
where
    T: Clone + Send + Sync + 'static,
{
    let combined = combine(inputs, CombineOptions::new(1, 0))?;
    Ok(unwrap_single_strict(&combined))
}

/// At least `min_results` successes, tolerating as many failures as still
/// leave the quorum reachable.
///
/// # Errors
///
/// `ConfigError::InvalidQuorum` when `min_results` exceeds the input count.
pub fn at_least<T>(
    min_results: usize,
    inputs: Vec<Promise<T>>,
) -> Result<Promise<Vec<T>>, ConfigError>
where
    T: Clone + Send + Sync + 'static,
{
    let total = inputs.len();
    combine(
        inputs,
        CombineOptions::new(min_results, total.saturating_sub(min_results)),
    )
}

/// At least `min_results` successes; the first failure fails the output.
///
/// # Errors
///
/// `ConfigError::InvalidQuorum` when `min_results` exceeds the input count.
pub fn at_least_strict<T>(
    min_results: usize,
    inputs: Vec<Promise<T>>,
) -> Result<Promise<Vec<T>>, ConfigError>
where
    T: Clone + Send + Sync + 'static,
{
    combine(inputs, CombineOptions::new(min_results, 0))
}

/// Race `promise` against `timer`; whichever settles first decides.
///
/// The timer is typically
/// [`TokioScheduler::timeout`](crate::runtime::TokioScheduler::timeout),
/// failing with [`AsyncError::Timeout`].
pub fn with_timeout<T>(promise: Promise<T>, timer: Promise<T>) -> Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    match any_strict(vec![promise, timer]) {
        Ok(raced) => raced,
        Err(e) => Promise::failed(AsyncError::msg(e)),
    }
}

/// Error used when a timer promise fires.
#[must_use]
pub const fn timeout_error(after: Duration) -> AsyncError {
    AsyncError::Timeout(after)
}

/// Take the single value; keep the aggregate (if several inputs) on failure.
fn unwrap_single<T>(combined: &Promise<Vec<T>>, keep_aggregate: bool) -> Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    combined
        .and_then(|values| first_value(values))
        .map_error(move |error| {
            if keep_aggregate {
                error
            } else {
                unwrap_cause(error)
            }
        })
}

/// Take the single value or the single cause.
fn unwrap_single_strict<T>(combined: &Promise<Vec<T>>) -> Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    combined
        .and_then(|values| first_value(values))
        .map_error(unwrap_cause)
}

fn first_value<T: Clone>(values: &[T]) -> Outcome<T> {
    values
        .first()
        .cloned()
        .ok_or_else(|| AsyncError::Protocol("quorum produced no value".into()))
}

fn unwrap_cause(error: AsyncError) -> AsyncError {
    match error {
        AsyncError::Aggregate(agg) => agg
            .first_cause()
            .cloned()
            .unwrap_or(AsyncError::Aggregate(agg)),
        other => other,
    }
}
