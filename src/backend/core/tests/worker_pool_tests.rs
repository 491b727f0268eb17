//! Tests for the task worker pool.
//!
//! Tests cover:
//! - Bounded concurrency across workers
//! - Jobs submitted before the workers start
//! - Statistics tracking for success, failure and panic
//! - Shutdown semantics

use futures::future::BoxFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskbus_core::error::{ErrorCode, Result, TaskbusError};
use taskbus_core::tasks::{Job, TaskId, WorkerPool};

// ============================================================================
// Helpers
// ============================================================================

fn job(name: &str, fut: BoxFuture<'static, Result<()>>) -> Job {
    Job::new(name, TaskId::from(name), fut)
}

async fn fail_decode() -> Result<()> {
    Err(TaskbusError::new(ErrorCode::DeserializationError, "bad payload"))
}

async fn panic_job() -> Result<()> {
    panic!("worker test panic")
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_never_exceeds_worker_count() {
    let pool = WorkerPool::new(16);
    pool.start(3);

    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    for i in 0..30 {
        let (active, peak) = (Arc::clone(&active), Arc::clone(&peak));
        pool.submit(job(
            &format!("job-{}", i),
            Box::pin(async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }),
        ))
        .await
        .unwrap();
    }

    pool.shutdown().await;
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(pool.stats().executed(), 30);
}

#[tokio::test]
async fn test_jobs_queued_before_start_run_after_start() {
    let pool = WorkerPool::new(4);
    let ran = Arc::new(AtomicUsize::new(0));

    for _ in 0..4 {
        let ran = Arc::clone(&ran);
        pool.submit(job(
            "early",
            Box::pin(async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        ))
        .await
        .unwrap();
    }
    assert_eq!(ran.load(Ordering::SeqCst), 0);

    pool.start(2);
    pool.shutdown().await;
    assert_eq!(ran.load(Ordering::SeqCst), 4);
}

// ============================================================================
// Statistics
// ============================================================================

#[tokio::test]
async fn test_stats_track_outcomes() {
    let pool = WorkerPool::new(8);
    pool.start(2);

    pool.submit(job("ok", Box::pin(async { Ok(()) }))).await.unwrap();
    pool.submit(job("decode", Box::pin(fail_decode()))).await.unwrap();
    pool.submit(job("panic", Box::pin(panic_job()))).await.unwrap();
    pool.submit(job("ok-again", Box::pin(async { Ok(()) }))).await.unwrap();

    pool.shutdown().await;

    let stats = pool.stats();
    assert_eq!(stats.executed(), 2);
    assert_eq!(stats.failed(), 1);
    assert_eq!(stats.panicked(), 1);
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_shutdown_without_start() {
    let pool = WorkerPool::new(1);
    pool.shutdown().await;
    let err = pool
        .submit(job("late", Box::pin(async { Ok(()) })))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::WorkerPoolClosed);
}

#[tokio::test]
async fn test_shutdown_twice() {
    let pool = WorkerPool::new(1);
    pool.start(1);
    pool.shutdown().await;
    pool.shutdown().await;
}
