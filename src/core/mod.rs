//! Core coordination primitives: promises, schedulers, tasks, combinators
//! and generators.

pub mod combinator;
pub mod error;
pub mod generator;
pub mod promise;
pub mod resolver;
pub mod scheduler;
pub mod sequence;
pub mod task;
pub mod worker_pool;

pub use combinator::{
    all, any, any_strict, at_least, at_least_strict, combine, with_timeout, CombineOptions,
};
pub use error::{AsyncError, ConfigError, MultitargetError};
pub use generator::{Generator, GeneratorCloser, Produced, Yielder};
pub use promise::{Outcome, Promise, PromiseFuture};
pub use resolver::{
    CallSite, DefaultSchedulerResolver, ExplicitSchedulerResolver, NamedSchedulerResolver,
    SchedulerResolver, SchedulerResolvers, SchedulerResolversBuilder,
};
pub use scheduler::{
    Characteristics, ContextualScheduler, SameThreadScheduler, Scheduler, SpanScheduler, Work,
};
pub use sequence::{ChunkOrder, ChunkedSequence};
pub use task::{spawn, spawn_on, Continuation, Suspend, SwitchTo, TaskBuilder, TaskId};
pub use worker_pool::{PoolError, PoolStats};
#[cfg(not(target_arch = "wasm32"))]
pub use worker_pool::ThreadPoolScheduler;
