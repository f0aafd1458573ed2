//! Scheduler resolution policy.
//!
//! A [`SchedulerResolvers`] chain holds resolvers ordered by descending
//! priority. Given a [`CallSite`], the first resolver with an opinion wins;
//! if none has one the chain falls back to [`SameThreadScheduler`].
//! Resolvers are registered explicitly through [`SchedulerResolversBuilder`];
//! two resolvers at the same priority are rejected when the chain is built.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::core::{ConfigError, SameThreadScheduler, Scheduler};

/// Context describing where a suspension or task start happens.
#[derive(Clone, Default)]
pub struct CallSite {
    name: String,
    explicit: Option<Arc<dyn Scheduler>>,
}

impl CallSite {
    /// Call site identified by `name` (conventionally a `module::function` path).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            explicit: None,
        }
    }

    /// Attach a scheduler explicitly passed by the caller.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.explicit = Some(scheduler);
        self
    }

    /// Call-site name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scheduler explicitly supplied by the caller, if any.
    #[must_use]
    pub const fn explicit_scheduler(&self) -> Option<&Arc<dyn Scheduler>> {
        self.explicit.as_ref()
    }
}

impl fmt::Debug for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSite")
            .field("name", &self.name)
            .field("explicit", &self.explicit.as_ref().map(|s| s.name().to_string()))
            .finish()
    }
}

/// Pluggable strategy picking a scheduler for a call site.
pub trait SchedulerResolver: Send + Sync + 'static {
    /// Higher priorities are consulted first.
    fn priority(&self) -> i32;

    /// A scheduler, or `None` for "no opinion".
    fn resolve(&self, site: &CallSite) -> Option<Arc<dyn Scheduler>>;

    /// Name used in ambiguity diagnostics.
    fn name(&self) -> &str {
        "resolver"
    }
}

/// Uses the scheduler the caller passed explicitly.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExplicitSchedulerResolver;

impl ExplicitSchedulerResolver {
    /// Priority of the explicit resolver.
    pub const PRIORITY: i32 = 1000;
}

impl SchedulerResolver for ExplicitSchedulerResolver {
    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn resolve(&self, site: &CallSite) -> Option<Arc<dyn Scheduler>> {
        site.explicit_scheduler().cloned()
    }

    fn name(&self) -> &str {
        "explicit"
    }
}

/// Routes call sites to schedulers by longest matching name prefix.
#[derive(Default)]
pub struct NamedSchedulerResolver {
    routes: HashMap<String, Arc<dyn Scheduler>>,
}

impl NamedSchedulerResolver {
    /// Priority of the named resolver.
    pub const PRIORITY: i32 = 200;

    /// Empty routing table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route call sites whose name starts with `prefix` to `scheduler`.
    #[must_use]
    pub fn route(mut self, prefix: impl Into<String>, scheduler: Arc<dyn Scheduler>) -> Self {
        self.routes.insert(prefix.into(), scheduler);
        self
    }

    /// Number of registered routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// True when no routes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl SchedulerResolver for NamedSchedulerResolver {
    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn resolve(&self, site: &CallSite) -> Option<Arc<dyn Scheduler>> {
        self.routes
            .iter()
            .filter(|(prefix, _)| site.name().starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, scheduler)| Arc::clone(scheduler))
    }

    fn name(&self) -> &str {
        "named"
    }
}

/// Always answers with one configured scheduler.
pub struct DefaultSchedulerResolver {
    scheduler: Arc<dyn Scheduler>,
}

impl DefaultSchedulerResolver {
    /// Priority of the default resolver.
    pub const PRIORITY: i32 = 10;

    /// Resolve every call site to `scheduler`.
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self { scheduler }
    }
}

impl SchedulerResolver for DefaultSchedulerResolver {
    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    fn resolve(&self, _site: &CallSite) -> Option<Arc<dyn Scheduler>> {
        Some(Arc::clone(&self.scheduler))
    }

    fn name(&self) -> &str {
        "default"
    }
}

/// Ordered resolver chain.
#[derive(Clone, Default)]
pub struct SchedulerResolvers {
    /// Sorted by descending priority; priorities are unique.
    resolvers: Vec<Arc<dyn SchedulerResolver>>,
}

impl fmt::Debug for SchedulerResolvers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.resolvers.iter().map(|r| (r.name().to_string(), r.priority())))
            .finish()
    }
}

impl SchedulerResolvers {
    /// Start building a chain.
    #[must_use]
    pub fn builder() -> SchedulerResolversBuilder {
        SchedulerResolversBuilder::default()
    }

    /// Pick the scheduler for `site`.
    #[must_use]
    pub fn resolve(&self, site: &CallSite) -> Arc<dyn Scheduler> {
        for resolver in &self.resolvers {
            if let Some(scheduler) = resolver.resolve(site) {
                tracing::trace!(
                    site = site.name(),
                    resolver = resolver.name(),
                    scheduler = scheduler.name(),
                    "scheduler resolved"
                );
                return scheduler;
            }
        }
        SameThreadScheduler::shared()
    }

    /// Priorities in consultation order.
    #[must_use]
    pub fn priorities(&self) -> Vec<i32> {
        self.resolvers.iter().map(|r| r.priority()).collect()
    }

    /// Process-wide chain; empty (same-thread fallback) until installed.
    pub fn global() -> &'static Self {
        static EMPTY: OnceLock<SchedulerResolvers> = OnceLock::new();
        GLOBAL
            .get()
            .unwrap_or_else(|| EMPTY.get_or_init(Self::default))
    }

    /// Install the process-wide chain. Succeeds once per process.
    ///
    /// # Errors
    ///
    /// `ConfigError::GlobalAlreadyInstalled` on any later call.
    pub fn install_global(self) -> Result<(), ConfigError> {
        GLOBAL
            .set(self)
            .map_err(|_| ConfigError::GlobalAlreadyInstalled)?;
        tracing::info!("global scheduler resolvers installed");
        Ok(())
    }
}

static GLOBAL: OnceLock<SchedulerResolvers> = OnceLock::new();

/// Builder registering resolvers explicitly.
#[derive(Default)]
pub struct SchedulerResolversBuilder {
    resolvers: Vec<Arc<dyn SchedulerResolver>>,
}

impl SchedulerResolversBuilder {
    /// Register a resolver.
    #[must_use]
    pub fn register<R>(mut self, resolver: R) -> Self
    where
        R: SchedulerResolver,
    {
        self.resolvers.push(Arc::new(resolver));
        self
    }

    /// Register an already shared resolver.
    #[must_use]
    pub fn register_shared(mut self, resolver: Arc<dyn SchedulerResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    /// Order the chain by priority.
    ///
    /// # Errors
    ///
    /// `ConfigError::AmbiguousResolvers` if two resolvers share a priority.
    pub fn build(mut self) -> Result<SchedulerResolvers, ConfigError> {
        self.resolvers
            .sort_by_key(|r| std::cmp::Reverse(r.priority()));
        for pair in self.resolvers.windows(2) {
            if pair[0].priority() == pair[1].priority() {
                return Err(ConfigError::AmbiguousResolvers {
                    priority: pair[0].priority(),
                    first: pair[0].name().to_string(),
                    second: pair[1].name().to_string(),
                });
            }
        }
        Ok(SchedulerResolvers {
            resolvers: self.resolvers,
        })
    }
}
