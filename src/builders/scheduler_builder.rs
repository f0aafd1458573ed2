//! Build the named scheduler set and resolver chain from a [`CoreConfig`].

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::config::{CoreConfig, SchedulerConfig};
use crate::core::{
    ConfigError, DefaultSchedulerResolver, ExplicitSchedulerResolver, NamedSchedulerResolver,
    SameThreadScheduler, Scheduler, SchedulerResolvers,
};

/// Schedulers by configured name.
pub type SchedulerMap = HashMap<String, Arc<dyn Scheduler>>;

/// Instantiate every scheduler defined in `cfg`.
///
/// Tokio schedulers without `worker_threads` attach to the runtime the
/// caller is running in.
///
/// # Errors
///
/// Any validation error, or `ConfigError::Unavailable` if a scheduler's
/// backend cannot be started here.
pub fn build_schedulers(cfg: &CoreConfig) -> Result<SchedulerMap, ConfigError> {
    cfg.validate()?;

    let mut schedulers = HashMap::with_capacity(cfg.schedulers.len());
    for (name, scheduler_cfg) in &cfg.schedulers {
        let scheduler = build_scheduler(name, scheduler_cfg)?;
        schedulers.insert(name.clone(), scheduler);
    }

    info!(count = schedulers.len(), default = %cfg.default_scheduler, "schedulers built");
    Ok(schedulers)
}

/// Resolver chain honoring explicit schedulers, then `cfg.routes`, then the
/// default scheduler.
///
/// # Errors
///
/// `ConfigError::UnknownScheduler` if a route or the default names a
/// scheduler missing from `schedulers`.
pub fn build_resolvers(
    cfg: &CoreConfig,
    schedulers: &SchedulerMap,
) -> Result<SchedulerResolvers, ConfigError> {
    let lookup = |name: &str| {
        schedulers
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownScheduler(name.to_string()))
    };

    let mut named = NamedSchedulerResolver::new();
    for (prefix, target) in &cfg.routes {
        named = named.route(prefix.clone(), lookup(target)?);
    }
    let default = lookup(&cfg.default_scheduler)?;

    SchedulerResolvers::builder()
        .register(ExplicitSchedulerResolver)
        .register(named)
        .register(DefaultSchedulerResolver::new(default))
        .build()
}

fn build_scheduler(name: &str, cfg: &SchedulerConfig) -> Result<Arc<dyn Scheduler>, ConfigError> {
    match cfg {
        SchedulerConfig::SameThread => Ok(SameThreadScheduler::shared()),
        SchedulerConfig::ThreadPool(pool) => build_thread_pool(name, pool),
        SchedulerConfig::Tokio { worker_threads } => build_tokio(name, *worker_threads),
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn build_thread_pool(
    name: &str,
    cfg: &crate::config::ThreadPoolConfig,
) -> Result<Arc<dyn Scheduler>, ConfigError> {
    crate::core::ThreadPoolScheduler::new(name, cfg.clone())
        .map(|pool| Arc::new(pool) as Arc<dyn Scheduler>)
        .map_err(|e| ConfigError::Invalid(format!("scheduler `{name}`: {e}")))
}

#[cfg(target_arch = "wasm32")]
fn build_thread_pool(
    name: &str,
    _cfg: &crate::config::ThreadPoolConfig,
) -> Result<Arc<dyn Scheduler>, ConfigError> {
    Err(ConfigError::Unavailable(format!(
        "scheduler `{name}`: thread pools are not available on wasm32"
    )))
}

#[cfg(feature = "tokio-runtime")]
fn build_tokio(
    name: &str,
    worker_threads: Option<usize>,
) -> Result<Arc<dyn Scheduler>, ConfigError> {
    use crate::runtime::TokioScheduler;

    let scheduler = match worker_threads {
        Some(threads) => TokioScheduler::with_worker_threads(name, threads)
            .map_err(|e| ConfigError::Unavailable(format!("scheduler `{name}`: {e}")))?,
        None => TokioScheduler::current(name)?,
    };
    Ok(Arc::new(scheduler))
}

#[cfg(not(feature = "tokio-runtime"))]
fn build_tokio(
    name: &str,
    _worker_threads: Option<usize>,
) -> Result<Arc<dyn Scheduler>, ConfigError> {
    Err(ConfigError::Unavailable(format!(
        "scheduler `{name}`: the tokio-runtime feature is disabled"
    )))
}
