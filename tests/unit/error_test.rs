//! Tests for error types

use prometheus_async::core::{AsyncError, ConfigError, MultitargetError, PoolError};
use std::time::Duration;

#[test]
fn test_cancelled_error() {
    let err = AsyncError::Cancelled;
    assert_eq!(format!("{err}"), "operation was cancelled");
    assert!(err.is_cancelled());
}

#[test]
fn test_failed_error_keeps_message() {
    let err = AsyncError::msg("disk unplugged");
    assert_eq!(format!("{err}"), "disk unplugged");

    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
    assert_eq!(AsyncError::failed(io).to_string(), "no such file");
}

#[test]
fn test_timeout_error() {
    let err = AsyncError::Timeout(Duration::from_millis(250));
    assert_eq!(format!("{err}"), "timed out after 250ms");
}

#[test]
fn test_rejected_error() {
    let err: AsyncError = PoolError::QueueFull.into();
    assert_eq!(format!("{err}"), "work rejected: job queue is full");
}

#[test]
fn test_generator_errors() {
    assert_eq!(AsyncError::GeneratorClosed.to_string(), "generator closed");
    assert_eq!(
        AsyncError::Protocol("produce out of turn".into()).to_string(),
        "generator protocol violation: produce out of turn"
    );
}

#[test]
fn test_aggregate_is_transparent() {
    let agg = MultitargetError::new(vec![Some(AsyncError::Cancelled), None]);
    let err = AsyncError::from(agg);
    assert_eq!(format!("{err}"), "1 of 2 operations failed");
    let causes: Vec<String> = err
        .as_aggregate()
        .unwrap()
        .causes()
        .map(ToString::to_string)
        .collect();
    assert_eq!(causes, vec!["operation was cancelled"]);
}

#[test]
fn test_config_errors() {
    let err = ConfigError::InvalidQuorum {
        min_results: 4,
        inputs: 3,
    };
    assert_eq!(format!("{err}"), "invalid quorum: min_results 4 exceeds 3 inputs");
    assert_eq!(
        ConfigError::UnknownScheduler("gpu".into()).to_string(),
        "unknown scheduler `gpu`"
    );
    assert_eq!(
        ConfigError::GlobalAlreadyInstalled.to_string(),
        "global scheduler resolvers already installed"
    );
}
