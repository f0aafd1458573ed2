//! Integration tests for logical tasks running on real schedulers.
//!
//! These tests validate:
//! - Suspension does not hold a worker thread
//! - Suspension points run in program order across thread hops
//! - Migrating a task between schedulers
//! - Context travelling with every resumption
//! - Fan-in of many tasks through a quorum

use parking_lot::Mutex;
use prometheus_async::config::ThreadPoolConfig;
use prometheus_async::core::{
    all, task, AsyncError, ContextualScheduler, Promise, SameThreadScheduler, Scheduler,
    ThreadPoolScheduler, Work,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn pool(name: &str, workers: usize) -> Arc<ThreadPoolScheduler> {
    Arc::new(
        ThreadPoolScheduler::new(
            name,
            ThreadPoolConfig::new()
                .with_worker_count(workers)
                .with_max_queue_depth(256)
                .with_thread_name_prefix(name),
        )
        .unwrap(),
    )
}

const WAIT: Duration = Duration::from_secs(10);

// ============================================================================
// SUSPENSION
// ============================================================================

#[test]
fn test_suspended_tasks_do_not_hold_workers() {
    // One worker, many suspended tasks: all must finish once released.
    let scheduler = pool("single", 1);
    let gate: Promise<u32> = Promise::new();

    let tasks: Vec<Promise<u32>> = (0..16)
        .map(|i| {
            let gate = gate.clone();
            task::spawn_on(scheduler.clone(), move |cx| async move {
                let base = cx.suspend(&gate).await?;
                Ok(base + i)
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(20));
    assert!(tasks.iter().all(|t| !t.is_done()));

    gate.complete(100);
    let total: u32 = tasks
        .iter()
        .map(|t| t.wait_blocking_for(WAIT).unwrap().unwrap())
        .sum();
    assert_eq!(total, (0..16).map(|i| 100 + i).sum::<u32>());
    scheduler.shutdown();
}

#[test]
fn test_suspension_points_run_in_program_order() {
    let scheduler = pool("ordered", 4);
    let steps: Vec<Promise<usize>> = (0..5).map(|_| Promise::new()).collect();
    let log = Arc::new(Mutex::new(Vec::new()));

    let awaited = steps.clone();
    let task_log = Arc::clone(&log);
    let result = task::spawn_on(scheduler.clone(), move |cx| async move {
        for step in &awaited {
            let value = cx.suspend(step).await?;
            task_log.lock().push(value);
        }
        Ok(cx.suspensions())
    });

    // Settle in reverse order from another thread.
    let settling = steps.clone();
    let settler = thread::spawn(move || {
        for (i, step) in settling.iter().enumerate().rev() {
            step.complete(i);
            thread::sleep(Duration::from_millis(2));
        }
    });
    settler.join().unwrap();

    assert_eq!(result.wait_blocking_for(WAIT).unwrap().unwrap(), 5);
    assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4]);
    scheduler.shutdown();
}

#[test]
fn test_error_recovered_inside_task() {
    let scheduler = pool("recover", 2);
    let failing: Promise<u32> = Promise::new();
    let awaited = failing.clone();
    let result = task::spawn_on(scheduler.clone(), move |cx| async move {
        match cx.suspend(&awaited).await {
            Ok(v) => Ok(v),
            Err(AsyncError::Failed(_)) => Ok(0),
            Err(e) => Err(e),
        }
    });
    failing.complete_exceptionally(AsyncError::msg("backend down"));
    assert_eq!(result.wait_blocking_for(WAIT).unwrap().unwrap(), 0);
    scheduler.shutdown();
}

// ============================================================================
// MIGRATION AND CONTEXT
// ============================================================================

#[test]
fn test_switch_to_moves_rest_of_task() {
    let first = pool("first", 1);
    let second = pool("second", 1);
    let target: Arc<dyn Scheduler> = second.clone();

    let result = task::spawn_on(first.clone(), move |cx| async move {
        let before = thread::current().name().map(str::to_string);
        cx.switch_to(target).await;
        let after = thread::current().name().map(str::to_string);
        Ok((before, after, cx.scheduler().name().to_string()))
    });

    let (before, after, name) = result.wait_blocking_for(WAIT).unwrap().unwrap();
    assert!(before.unwrap_or_default().starts_with("first"));
    assert!(after.unwrap_or_default().starts_with("second"));
    assert_eq!(name, "second");
    first.shutdown();
    second.shutdown();
}

#[test]
fn test_context_wraps_every_resumption() {
    let resumptions = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&resumptions);
    let inner = SameThreadScheduler::shared();
    let scheduler: Arc<dyn Scheduler> = Arc::new(ContextualScheduler::new(inner, move |work: Work| {
        let counter = Arc::clone(&counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            work();
        }) as Work
    }));

    let a: Promise<u8> = Promise::new();
    let b: Promise<u8> = Promise::new();
    let (wa, wb) = (a.clone(), b.clone());
    let result = task::spawn_on(scheduler, move |cx| async move {
        let x = cx.suspend(&wa).await?;
        let y = cx.suspend(&wb).await?;
        Ok(x + y)
    });
    a.complete(1);
    b.complete(2);

    assert_eq!(result.wait_blocking_for(WAIT).unwrap().unwrap(), 3);
    // Initial step plus one resumption per suspension.
    assert_eq!(resumptions.load(Ordering::SeqCst), 3);
}

// ============================================================================
// FAN-IN
// ============================================================================

#[test]
fn test_many_tasks_fan_into_all() {
    let scheduler = pool("fan", 4);
    let tasks: Vec<Promise<usize>> = (0..64)
        .map(|i| {
            task::spawn_on(scheduler.clone(), move |_cx| async move {
                thread::sleep(Duration::from_micros(50));
                Ok(i * 2)
            })
        })
        .collect();

    let joined = all(tasks);
    let values = joined.wait_blocking_for(WAIT).unwrap().unwrap();
    assert_eq!(values, (0..64).map(|i| i * 2).collect::<Vec<_>>());
    assert!(scheduler.stats().submitted_jobs >= 64);
    scheduler.shutdown();
}

#[test]
fn test_cancelling_task_stops_it_at_next_suspension() {
    let scheduler = pool("cancel", 1);
    let gate: Promise<()> = Promise::new();
    let reached = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&reached);
    let awaited = gate.clone();
    let result: Promise<()> = task::spawn_on(scheduler.clone(), move |cx| async move {
        cx.suspend(&awaited).await?;
        flag.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    assert!(result.cancel());
    gate.complete(());
    thread::sleep(Duration::from_millis(20));
    assert!(result.is_cancelled());
    assert_eq!(reached.load(Ordering::SeqCst), 0);
    scheduler.shutdown();
}
