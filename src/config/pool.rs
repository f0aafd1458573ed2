//! Scheduler and thread-pool configuration structures.

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::ConfigError;

/// Environment variable overriding the worker count.
pub const ENV_WORKERS: &str = "PROMETHEUS_ASYNC_WORKERS";
/// Environment variable overriding the queue depth.
pub const ENV_QUEUE_DEPTH: &str = "PROMETHEUS_ASYNC_QUEUE_DEPTH";
/// Environment variable overriding interruptibility.
pub const ENV_INTERRUPTIBLE: &str = "PROMETHEUS_ASYNC_INTERRUPTIBLE";
/// Environment variable overriding the chunk size.
pub const ENV_CHUNK_SIZE: &str = "PROMETHEUS_ASYNC_CHUNK_SIZE";

const DEFAULT_QUEUE_DEPTH: usize = 1024;
const DEFAULT_CHUNK_SIZE: usize = 16;

/// Configuration for a [`ThreadPoolScheduler`](crate::core::ThreadPoolScheduler).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadPoolConfig {
    /// Number of worker threads.
    pub worker_count: usize,
    /// Maximum queued jobs before rejection.
    pub max_queue_depth: usize,
    /// Skip queued jobs whose promise was cancelled.
    pub interruptible: bool,
    /// Stack size of each worker thread, in bytes.
    pub thread_stack_size: usize,
    /// Worker threads are named `{prefix}-{id}`.
    pub thread_name_prefix: String,
    /// Per-worker join timeout during shutdown.
    pub join_timeout_ms: u64,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get(),
            max_queue_depth: DEFAULT_QUEUE_DEPTH,
            interruptible: true,
            thread_stack_size: 2 * 1024 * 1024,
            thread_name_prefix: "pa-worker".into(),
            join_timeout_ms: 2000,
        }
    }
}

impl ThreadPoolConfig {
    /// Defaults: one worker per CPU, queue depth 1024, interruptible.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads.
    #[must_use]
    pub const fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the queue depth.
    #[must_use]
    pub const fn with_max_queue_depth(mut self, max_queue_depth: usize) -> Self {
        self.max_queue_depth = max_queue_depth;
        self
    }

    /// Set interruptibility.
    #[must_use]
    pub const fn with_interruptible(mut self, interruptible: bool) -> Self {
        self.interruptible = interruptible;
        self
    }

    /// Set the worker stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, thread_stack_size: usize) -> Self {
        self.thread_stack_size = thread_stack_size;
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// A description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.max_queue_depth == 0 {
            return Err("max_queue_depth must be greater than 0".into());
        }
        if self.thread_stack_size == 0 {
            return Err("thread_stack_size must be greater than 0".into());
        }
        Ok(())
    }
}

/// One named scheduler definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchedulerConfig {
    /// Dedicated OS worker threads.
    ThreadPool(ThreadPoolConfig),
    /// Run inline on the resuming thread.
    SameThread,
    /// Tokio runtime: the ambient one, or an owned runtime when
    /// `worker_threads` is set.
    Tokio {
        /// Worker threads of an owned runtime.
        #[serde(default)]
        worker_threads: Option<usize>,
    },
}

impl SchedulerConfig {
    /// Validate the definition.
    ///
    /// # Errors
    ///
    /// A description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::ThreadPool(pool) => pool.validate(),
            Self::SameThread => Ok(()),
            Self::Tokio {
                worker_threads: Some(0),
            } => Err("worker_threads must be greater than 0".into()),
            Self::Tokio { .. } => Ok(()),
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

/// Root configuration: named schedulers, routes and sequence defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Scheduler answering call sites no route matches.
    pub default_scheduler: String,
    /// Scheduler definitions by name.
    pub schedulers: HashMap<String, SchedulerConfig>,
    /// Call-site prefix to scheduler name.
    #[serde(default)]
    pub routes: HashMap<String, String>,
    /// Window of chunked sequences.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        let mut schedulers = HashMap::new();
        schedulers.insert(
            "default".to_string(),
            SchedulerConfig::ThreadPool(ThreadPoolConfig::default()),
        );
        Self {
            default_scheduler: "default".into(),
            schedulers,
            routes: HashMap::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl CoreConfig {
    /// Validate all schedulers and the references between them.
    ///
    /// # Errors
    ///
    /// - `ConfigError::Invalid` for an empty scheduler set, a zero chunk size
    ///   or an invalid scheduler definition
    /// - `ConfigError::UnknownScheduler` for a default or route target that
    ///   is not defined
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schedulers.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one scheduler must be defined".into(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be greater than 0".into()));
        }
        for (name, scheduler) in &self.schedulers {
            scheduler
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("scheduler `{name}` invalid: {e}")))?;
        }
        if !self.schedulers.contains_key(&self.default_scheduler) {
            return Err(ConfigError::UnknownScheduler(self.default_scheduler.clone()));
        }
        for target in self.routes.values() {
            if !self.schedulers.contains_key(target) {
                return Err(ConfigError::UnknownScheduler(target.clone()));
            }
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// `ConfigError::Invalid` on a parse error, or any validation error.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(input)
            .map_err(|e| ConfigError::Invalid(format!("parse error: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Single thread-pool configuration from the environment.
    ///
    /// Loads an optional `.env` file first, then reads
    /// `PROMETHEUS_ASYNC_WORKERS`, `PROMETHEUS_ASYNC_QUEUE_DEPTH`,
    /// `PROMETHEUS_ASYNC_INTERRUPTIBLE` and `PROMETHEUS_ASYNC_CHUNK_SIZE`.
    ///
    /// # Errors
    ///
    /// `ConfigError::Invalid` if a variable does not parse, or any
    /// validation error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`CoreConfig::from_env`], reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// See [`CoreConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ThreadPoolConfig::default();
        let pool = ThreadPoolConfig {
            worker_count: parse_var(&lookup, ENV_WORKERS, defaults.worker_count)?,
            max_queue_depth: parse_var(&lookup, ENV_QUEUE_DEPTH, defaults.max_queue_depth)?,
            interruptible: parse_var(&lookup, ENV_INTERRUPTIBLE, defaults.interruptible)?,
            ..defaults
        };

        let mut cfg = Self {
            chunk_size: parse_var(&lookup, ENV_CHUNK_SIZE, DEFAULT_CHUNK_SIZE)?,
            ..Self::default()
        };
        cfg.schedulers
            .insert(cfg.default_scheduler.clone(), SchedulerConfig::ThreadPool(pool));
        cfg.validate()?;
        Ok(cfg)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("{key}={raw}: {e}"))),
    }
}
