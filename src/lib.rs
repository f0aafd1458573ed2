//! # Prometheus Async
//!
//! A suspension-based coordination core: write sequential-looking logic that
//! waits on asynchronous results without blocking threads, and fan many
//! concurrent operations into one result.
//!
//! ## Building blocks
//!
//! - **Promise**: single-assignment container with exactly-once callbacks and
//!   cancellation ([`core::Promise`]).
//! - **Logical tasks**: futures driven by a pluggable [`core::Scheduler`],
//!   suspending on promises through a [`core::Continuation`].
//! - **Quorum combinators**: `all`, `any`, `at_least` and their strict
//!   variants merge many promises into one ([`core::combinator`]).
//! - **Generators**: a producer and a consumer alternate through a two-gate
//!   rendezvous ([`core::Generator`], [`core::Yielder`]).
//! - **Resolver chain**: decides which scheduler runs a call site
//!   ([`core::SchedulerResolvers`]).
//! - **Sequences**: map/filter/take over generators and a chunked, lazily
//!   enlisting sequence of promises ([`core::sequence`]).
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_async::config::ThreadPoolConfig;
//! use prometheus_async::core::{combinator, task, Promise, ThreadPoolScheduler};
//!
//! let pool = Arc::new(ThreadPoolScheduler::new("cpu", ThreadPoolConfig::new())?);
//! let lookups: Vec<Promise<u32>> = (0..3)
//!     .map(|i| task::spawn_on(pool.clone(), move |_cx| async move { Ok(i * 10) }))
//!     .collect();
//!
//! let quorum = combinator::at_least(2, lookups)?;
//! let total = task::spawn("billing::total", move |cx| async move {
//!     let values = cx.suspend(&quorum).await?;
//!     Ok(values.iter().sum::<u32>())
//! });
//! ```
//!
//! Schedulers and routing can also be built from JSON or environment
//! configuration through [`config::CoreConfig`] and [`builders`].

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core coordination primitives.
pub mod core;
/// Configuration models for schedulers, thread pools and routing.
pub mod config;
/// Builders to construct schedulers and resolver chains from configuration.
pub mod builders;
/// Runtime adapters.
pub mod runtime;
/// Shared utilities.
pub mod util;
