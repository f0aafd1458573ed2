//! Error types for promises, combinators, generators and scheduler setup.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::core::worker_pool::PoolError;

/// Failure delivered through a [`Promise`](crate::core::Promise).
///
/// Every variant is cheap to clone so one outcome can be handed to any
/// number of completion callbacks.
#[derive(Debug, Clone, Error)]
pub enum AsyncError {
    /// The operation was cancelled before it produced a value.
    #[error("operation was cancelled")]
    Cancelled,
    /// Application failure raised inside a logical task or completion source.
    #[error("{0}")]
    Failed(Arc<anyhow::Error>),
    /// A quorum combinator gave up; carries every recorded cause.
    #[error(transparent)]
    Aggregate(#[from] MultitargetError),
    /// A task or unit of work panicked.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// A competing timer won the race.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// The scheduler refused the unit of work.
    #[error("work rejected: {0}")]
    Rejected(#[from] PoolError),
    /// The generator was closed while the producer was waiting for its turn.
    #[error("generator closed")]
    GeneratorClosed,
    /// Producer and consumer broke the alternating handoff.
    #[error("generator protocol violation: {0}")]
    Protocol(String),
}

impl AsyncError {
    /// Wrap an arbitrary error as an application failure.
    pub fn failed<E>(err: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        Self::Failed(Arc::new(err.into()))
    }

    /// Build an application failure from a message.
    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self::Failed(Arc::new(anyhow::Error::msg(message)))
    }

    /// True for the cancellation variant.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Aggregate view, if this error came from a combinator.
    #[must_use]
    pub const fn as_aggregate(&self) -> Option<&MultitargetError> {
        match self {
            Self::Aggregate(agg) => Some(agg),
            _ => None,
        }
    }
}

/// Aggregate error produced when a quorum combinator fails.
///
/// `errors` is index-aligned with the combinator inputs: slot `i` holds the
/// failure of input `i` if that failure was recorded, `None` otherwise.
#[derive(Debug, Clone, Error)]
#[error("{} of {} operations failed", .errors.iter().flatten().count(), .errors.len())]
pub struct MultitargetError {
    errors: Vec<Option<AsyncError>>,
}

impl MultitargetError {
    /// Create an aggregate from index-aligned slots.
    #[must_use]
    pub const fn new(errors: Vec<Option<AsyncError>>) -> Self {
        Self { errors }
    }

    /// Aggregate of exactly one cause, used by single-input passthroughs.
    #[must_use]
    pub fn single(cause: AsyncError) -> Self {
        Self {
            errors: vec![Some(cause)],
        }
    }

    /// Index-aligned slots.
    #[must_use]
    pub fn errors(&self) -> &[Option<AsyncError>] {
        &self.errors
    }

    /// Recorded causes in input order.
    pub fn causes(&self) -> impl Iterator<Item = &AsyncError> {
        self.errors.iter().flatten()
    }

    /// First recorded cause in input order.
    #[must_use]
    pub fn first_cause(&self) -> Option<&AsyncError> {
        self.causes().next()
    }

    /// Number of recorded causes.
    #[must_use]
    pub fn count(&self) -> usize {
        self.errors.iter().filter(|e| e.is_some()).count()
    }
}

/// Structural errors reported synchronously at setup or call time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// More successes requested than there are inputs.
    #[error("invalid quorum: min_results {min_results} exceeds {inputs} inputs")]
    InvalidQuorum {
        /// Requested successes.
        min_results: usize,
        /// Number of inputs supplied.
        inputs: usize,
    },
    /// Two resolvers were registered at the same priority.
    #[error("ambiguous scheduler resolvers `{first}` and `{second}` at priority {priority}")]
    AmbiguousResolvers {
        /// Conflicting priority.
        priority: i32,
        /// Resolver registered first.
        first: String,
        /// Resolver registered second.
        second: String,
    },
    /// The process-wide resolver chain was already installed.
    #[error("global scheduler resolvers already installed")]
    GlobalAlreadyInstalled,
    /// Named scheduler missing from configuration.
    #[error("unknown scheduler `{0}`")]
    UnknownScheduler(String),
    /// Configuration values failed validation.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Backing executor could not be created.
    #[error("scheduler unavailable: {0}")]
    Unavailable(String),
}
