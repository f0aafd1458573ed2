//! Tests for building schedulers and resolvers from configuration

use prometheus_async::builders::{build_resolvers, build_schedulers};
use prometheus_async::config::{CoreConfig, SchedulerConfig, ThreadPoolConfig};
use prometheus_async::core::{CallSite, ConfigError, TaskBuilder};
use std::collections::HashMap;
use std::time::Duration;

fn sample_config() -> CoreConfig {
    let mut schedulers = HashMap::new();
    schedulers.insert(
        "cpu".to_string(),
        SchedulerConfig::ThreadPool(ThreadPoolConfig::new().with_worker_count(2)),
    );
    schedulers.insert("inline".to_string(), SchedulerConfig::SameThread);
    let mut routes = HashMap::new();
    routes.insert("render::".to_string(), "inline".to_string());
    CoreConfig {
        default_scheduler: "cpu".into(),
        schedulers,
        routes,
        chunk_size: 4,
    }
}

#[test]
fn test_build_schedulers_by_name() {
    let schedulers = build_schedulers(&sample_config()).unwrap();
    assert_eq!(schedulers.len(), 2);
    assert_eq!(schedulers["cpu"].name(), "cpu");
    assert_eq!(schedulers["inline"].name(), "same-thread");
}

#[test]
fn test_build_resolvers_routes_call_sites() {
    let cfg = sample_config();
    let schedulers = build_schedulers(&cfg).unwrap();
    let chain = build_resolvers(&cfg, &schedulers).unwrap();

    assert_eq!(chain.resolve(&CallSite::new("render::frame")).name(), "inline");
    assert_eq!(chain.resolve(&CallSite::new("batch::job")).name(), "cpu");

    let inline = TaskBuilder::new("render::frame")
        .resolvers(&chain)
        .spawn(|_cx| async { Ok(1u8) });
    assert!(inline.is_done());

    let pooled = TaskBuilder::new("batch::job")
        .resolvers(&chain)
        .spawn(|cx| async move { Ok(cx.scheduler().name().to_string()) });
    let name = pooled.wait_blocking_for(Duration::from_secs(5)).unwrap().unwrap();
    assert_eq!(name, "cpu");
}

#[test]
fn test_build_rejects_invalid_config() {
    let mut cfg = sample_config();
    cfg.routes.insert("gpu::".into(), "gpu".into());
    assert_eq!(
        build_schedulers(&cfg).unwrap_err(),
        ConfigError::UnknownScheduler("gpu".into())
    );
}

#[test]
fn test_build_resolvers_with_missing_scheduler() {
    let cfg = sample_config();
    let mut schedulers = build_schedulers(&cfg).unwrap();
    schedulers.remove("inline");
    assert!(matches!(
        build_resolvers(&cfg, &schedulers),
        Err(ConfigError::UnknownScheduler(name)) if name == "inline"
    ));
}
