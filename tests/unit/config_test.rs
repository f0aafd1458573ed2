//! Tests for configuration validation

use prometheus_async::config::{
    CoreConfig, SchedulerConfig, ThreadPoolConfig, ENV_CHUNK_SIZE, ENV_INTERRUPTIBLE, ENV_WORKERS,
};
use prometheus_async::core::ConfigError;
use std::collections::HashMap;

#[test]
fn test_thread_pool_config_validation() {
    assert!(ThreadPoolConfig::new().with_worker_count(2).validate().is_ok());
    assert!(ThreadPoolConfig::new().with_worker_count(0).validate().is_err());
    assert!(ThreadPoolConfig::new().with_max_queue_depth(0).validate().is_err());
    assert!(ThreadPoolConfig::new().with_thread_stack_size(0).validate().is_err());
}

#[test]
fn test_thread_pool_config_defaults() {
    let cfg = ThreadPoolConfig::default();
    assert!(cfg.worker_count > 0);
    assert_eq!(cfg.max_queue_depth, 1024);
    assert!(cfg.interruptible);
    assert_eq!(cfg.thread_name_prefix, "pa-worker");
}

#[test]
fn test_scheduler_config_validation() {
    assert!(SchedulerConfig::SameThread.validate().is_ok());
    assert!(SchedulerConfig::Tokio { worker_threads: None }.validate().is_ok());
    assert!(SchedulerConfig::Tokio {
        worker_threads: Some(0)
    }
    .validate()
    .is_err());
}

#[test]
fn test_core_config_default_is_valid() {
    let cfg = CoreConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.default_scheduler, "default");
    assert_eq!(cfg.chunk_size, 16);
}

#[test]
fn test_core_config_empty_schedulers() {
    let cfg = CoreConfig {
        schedulers: HashMap::new(),
        ..CoreConfig::default()
    };
    assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
}

#[test]
fn test_core_config_unknown_default() {
    let cfg = CoreConfig {
        default_scheduler: "missing".into(),
        ..CoreConfig::default()
    };
    assert_eq!(
        cfg.validate(),
        Err(ConfigError::UnknownScheduler("missing".into()))
    );
}

#[test]
fn test_core_config_json_roundtrip() {
    let mut cfg = CoreConfig::default();
    cfg.schedulers
        .insert("inline".into(), SchedulerConfig::SameThread);
    cfg.routes.insert("render::".into(), "inline".into());

    let json = serde_json::to_string(&cfg).unwrap();
    let parsed = CoreConfig::from_json_str(&json).unwrap();
    assert_eq!(parsed, cfg);
}

#[test]
fn test_core_config_rejects_bad_json() {
    assert!(matches!(
        CoreConfig::from_json_str("{ not json"),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_from_lookup_overrides() {
    let vars: HashMap<&str, &str> = [
        (ENV_WORKERS, "3"),
        (ENV_INTERRUPTIBLE, "false"),
        (ENV_CHUNK_SIZE, " 8 "),
    ]
    .into_iter()
    .collect();
    let cfg = CoreConfig::from_lookup(|key| vars.get(key).map(|v| (*v).to_string())).unwrap();

    assert_eq!(cfg.chunk_size, 8);
    match cfg.schedulers.get(&cfg.default_scheduler) {
        Some(SchedulerConfig::ThreadPool(pool)) => {
            assert_eq!(pool.worker_count, 3);
            assert!(!pool.interruptible);
        }
        other => panic!("unexpected scheduler: {other:?}"),
    }
}

#[test]
fn test_from_lookup_rejects_garbage() {
    let err = CoreConfig::from_lookup(|key| (key == ENV_WORKERS).then(|| "many".to_string()))
        .unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains(ENV_WORKERS)));
}
