//! Tests for the worker pool

use super::*;
use crate::error::FleetError;
use crate::shutdown::Shutdown;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn pool(concurrency: usize) -> WorkerPool {
    WorkerPool::new(concurrency, Arc::new(ApiRateLimiter::unlimited()))
}

#[tokio::test]
async fn test_results_in_input_order() {
    let results = pool(4)
        .run_all(vec![30u64, 1, 20, 5], |delay_ms| async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            delay_ms
        })
        .await;

    let values: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(values, vec![30, 1, 20, 5]);
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let (in_flight_c, peak_c) = (Arc::clone(&in_flight), Arc::clone(&peak));
    let results = pool(2)
        .run_all((0..8).collect(), move |_: usize| {
            let in_flight = Arc::clone(&in_flight_c);
            let peak = Arc::clone(&peak_c);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;

    assert_eq!(results.len(), 8);
    assert!(results.iter().all(|r| r.is_ok()));
    assert!(peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_parallel_speedup() {
    let start = Instant::now();
    let results = pool(5)
        .run_all((0..10).collect(), |_: u32| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
        })
        .await;
    assert_eq!(results.len(), 10);
    // Two waves of five, far less than ten serial sleeps
    assert!(start.elapsed() < Duration::from_millis(400));
}

#[tokio::test]
async fn test_cancelled_items_are_skipped() {
    let shutdown = Shutdown::new();
    shutdown.trigger();
    let executed = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&executed);
    let results = pool(2)
        .with_shutdown(shutdown.listener())
        .run_all(vec![1, 2, 3], move |_: i32| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;

    assert_eq!(executed.load(Ordering::SeqCst), 0);
    assert!(results
        .iter()
        .all(|r| matches!(r, Err(FleetError::Cancelled))));
}

#[tokio::test]
async fn test_uncancellable_pool_ignores_shutdown() {
    let shutdown = Shutdown::new();
    shutdown.trigger();

    let cancellable = pool(2).with_shutdown(shutdown.listener());
    let results = cancellable
        .uncancellable()
        .run_all(vec![1, 2], |n: i32| async move { n * 2 })
        .await;

    let values: Vec<i32> = results.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(values, vec![2, 4]);
}

#[tokio::test]
async fn test_panicking_task_is_isolated() {
    let results = pool(2)
        .run_all(vec![1, 2, 3], |n: i32| async move {
            if n == 2 {
                panic!("boom");
            }
            n
        })
        .await;

    assert!(matches!(results[0], Ok(1)));
    assert!(matches!(results[1], Err(FleetError::Worker(_))));
    assert!(matches!(results[2], Ok(3)));
}

#[test]
fn test_zero_concurrency_clamped() {
    assert_eq!(pool(0).concurrency(), 1);
}

#[test]
fn test_debug_format() {
    let debug = format!("{:?}", pool(3));
    assert!(debug.contains("WorkerPool"));
    assert!(debug.contains("concurrency: 3"));
}
