//! Builders to construct schedulers and resolver chains from configuration.

pub mod scheduler_builder;

pub use scheduler_builder::{build_resolvers, build_schedulers, SchedulerMap};
