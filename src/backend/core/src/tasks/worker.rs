//! Fixed-size worker pool executing task handlers.

use super::TaskId;
use crate::error::{ErrorCode, Result, TaskbusError};
use crate::telemetry::TaskMetrics;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// A handler invocation queued for a worker.
pub struct Job {
    task: String,
    id: TaskId,
    fut: BoxFuture<'static, Result<()>>,
}

impl Job {
    pub fn new(task: impl Into<String>, id: TaskId, fut: BoxFuture<'static, Result<()>>) -> Self {
        Self {
            task: task.into(),
            id,
            fut,
        }
    }
}

/// Counters for jobs the pool finished.
#[derive(Debug, Default)]
pub struct WorkerStats {
    executed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
}

impl WorkerStats {
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn panicked(&self) -> u64 {
        self.panicked.load(Ordering::Relaxed)
    }
}

/// Persistent workers pulling jobs from one bounded queue.
///
/// The queue exists from construction so jobs may be submitted before
/// [`WorkerPool::start`]; they wait for the first worker. A handler panic is
/// caught and counted, and the worker keeps running.
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<WorkerStats>,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            sender: Mutex::new(Some(tx)),
            receiver: Arc::new(tokio::sync::Mutex::new(rx)),
            workers: Mutex::new(Vec::new()),
            stats: Arc::new(WorkerStats::default()),
        }
    }

    /// Spawn `num_workers` workers.
    pub fn start(&self, num_workers: usize) {
        let mut workers = self.workers.lock();
        for worker in 0..num_workers.max(1) {
            let receiver = Arc::clone(&self.receiver);
            let stats = Arc::clone(&self.stats);
            workers.push(tokio::spawn(run_worker(worker, receiver, stats)));
        }
        info!(workers = workers.len(), "Worker pool started");
    }

    /// Queue a job, waiting while the queue is full.
    pub async fn submit(&self, job: Job) -> Result<()> {
        let sender = self.sender.lock().clone().ok_or_else(closed)?;
        sender.send(job).await.map_err(|_| closed())
    }

    /// Close the queue and wait until every queued job has run.
    pub async fn shutdown(&self) {
        drop(self.sender.lock().take());

        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker terminated abnormally");
            }
        }
        debug!("Worker pool stopped");
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }
}

fn closed() -> TaskbusError {
    TaskbusError::new(ErrorCode::WorkerPoolClosed, "worker pool is shut down")
}

async fn run_worker(
    worker: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    stats: Arc<WorkerStats>,
) {
    loop {
        let job = receiver.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };
        execute(worker, job, &stats).await;
    }
}

async fn execute(worker: usize, job: Job, stats: &WorkerStats) {
    let Job { task, id, fut } = job;
    let started = Instant::now();

    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(())) => {
            stats.executed.fetch_add(1, Ordering::Relaxed);
            TaskMetrics::executed(&task, started.elapsed());
            info!(task = %task, id = %id, worker, "Task executed");
        }
        Ok(Err(e)) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            let reason = if e.code() == ErrorCode::DeserializationError {
                "decode"
            } else {
                "error"
            };
            TaskMetrics::failed(&task, reason);
            error!(task = %task, id = %id, worker, reason, error = %e, "Task handler failed");
        }
        Err(panic) => {
            stats.panicked.fetch_add(1, Ordering::Relaxed);
            TaskMetrics::failed(&task, "panic");
            error!(
                task = %task,
                id = %id,
                worker,
                panic = %panic_message(panic.as_ref()),
                "Task handler panicked"
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn job(task: &str, fut: BoxFuture<'static, Result<()>>) -> Job {
        Job::new(task, TaskId::from(1), fut)
    }

    async fn explode() -> Result<()> {
        panic!("handler exploded")
    }

    #[tokio::test]
    async fn test_runs_all_jobs_before_shutdown_returns() {
        let pool = WorkerPool::new(2);
        pool.start(3);

        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            pool.submit(job(
                "count",
                Box::pin(async move {
                    tokio::task::yield_now().await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            ))
            .await
            .unwrap();
        }

        pool.shutdown().await;
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert_eq!(pool.stats().executed(), 10);
    }

    #[tokio::test]
    async fn test_panic_does_not_kill_worker() {
        let pool = WorkerPool::new(1);
        pool.start(1);

        pool.submit(job("boom", Box::pin(explode())))
            .await
            .unwrap();
        pool.submit(job(
            "fails",
            Box::pin(async { Err(TaskbusError::internal("nope")) }),
        ))
        .await
        .unwrap();
        pool.submit(job("ok", Box::pin(async { Ok(()) }))).await.unwrap();

        pool.shutdown().await;
        assert_eq!(pool.stats().panicked(), 1);
        assert_eq!(pool.stats().failed(), 1);
        assert_eq!(pool.stats().executed(), 1);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_fails() {
        let pool = WorkerPool::new(1);
        pool.start(1);
        pool.shutdown().await;

        let err = pool
            .submit(job("late", Box::pin(async { Ok(()) })))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::WorkerPoolClosed);
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(boxed.as_ref()), "static str");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(17u8);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }
}
