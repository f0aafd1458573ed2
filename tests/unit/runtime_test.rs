//! Tests for the tokio scheduler

use prometheus_async::core::{task, with_timeout, AsyncError, Promise, Scheduler};
use prometheus_async::runtime::TokioScheduler;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_scheduler_runs_tasks() {
    let scheduler = Arc::new(TokioScheduler::current("io").unwrap());
    assert!(scheduler.characteristics().interruptible);

    let gate: Promise<u32> = Promise::new();
    let awaited = gate.clone();
    let result = task::spawn_on(scheduler.clone(), move |cx| async move {
        let v = cx.suspend(&awaited).await?;
        Ok(v * 2)
    });
    gate.complete(21);
    assert_eq!(result.await.unwrap(), 42);
}

#[tokio::test]
async fn test_delay_completes() {
    let scheduler = TokioScheduler::current("timers").unwrap();
    scheduler.delay(Duration::from_millis(5)).await.unwrap();
}

#[tokio::test]
async fn test_timeout_wins_against_slow_promise() {
    let scheduler = TokioScheduler::current("timers").unwrap();
    let slow: Promise<u8> = Promise::new();
    let guarded = with_timeout(slow.clone(), scheduler.timeout(Duration::from_millis(5)));
    assert!(matches!(guarded.await, Err(AsyncError::Timeout(_))));
    assert!(slow.is_cancelled());
}

#[test]
fn test_current_outside_runtime_fails() {
    assert!(TokioScheduler::current("nowhere").is_err());
}

#[test]
fn test_owned_runtime() {
    let scheduler = Arc::new(TokioScheduler::with_worker_threads("owned", 1).unwrap());
    let result = task::spawn_on(scheduler.clone(), |_cx| async { Ok("done") });
    assert_eq!(
        result.wait_blocking_for(Duration::from_secs(5)).unwrap().unwrap(),
        "done"
    );
}
