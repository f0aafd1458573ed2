//! Configuration models for schedulers, thread pools and routing.

pub mod pool;

pub use pool::{
    CoreConfig, SchedulerConfig, ThreadPoolConfig, ENV_CHUNK_SIZE, ENV_INTERRUPTIBLE,
    ENV_QUEUE_DEPTH, ENV_WORKERS,
};
