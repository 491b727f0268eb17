//! The task scheduler.
//!
//! A launch writes a fresh [`Payload`] under the operation's key and pushes
//! the bare [`Operation`] on the event bus. Whichever process consumes the
//! event waits out the delay locally, re-reads the key, and only dispatches
//! when the stored payload is still the one it saw on receipt. A newer
//! launch of the same key therefore supersedes an older one without ever
//! reaching the older timer.

use super::worker::{Job, WorkerPool};
use super::{Operation, OperationHandler, Payload, TaskId};
use crate::config::WorkerConfig;
use crate::error::{ErrorCode, Result, TaskbusError};
use crate::events::{Event, EventBus, EventHandler};
use crate::store::KvStore;
use crate::telemetry::TaskMetrics;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Event name reserved for task operations.
pub const TASK_EVENT: &str = "task";

// ═══════════════════════════════════════════════════════════════════════════════
// Settings
// ═══════════════════════════════════════════════════════════════════════════════

/// Scheduler tuning, usually derived from [`WorkerConfig`].
#[derive(Debug, Clone)]
pub struct TaskSettings {
    /// Operation key prefix
    pub key_prefix: String,
    /// Added to each task's delay to form the payload TTL
    pub ttl_margin: Duration,
    /// Worker-pool members started by [`TaskManager::start`]
    pub num_workers: usize,
    /// Bound of the worker queue
    pub queue_capacity: usize,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            key_prefix: "tasks".to_string(),
            ttl_margin: Duration::from_secs(30),
            num_workers: 1,
            queue_capacity: 1,
        }
    }
}

impl From<&WorkerConfig> for TaskSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            key_prefix: config.key_prefix.clone(),
            ttl_margin: Duration::from_secs(config.ttl_margin_secs),
            num_workers: config.num_workers,
            queue_capacity: config.queue_capacity(),
        }
    }
}

/// Snapshot of scheduler activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub executed: u64,
    pub failed: u64,
    pub panicked: u64,
    pub pending_timers: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Running,
    Stopped,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Task Manager
// ═══════════════════════════════════════════════════════════════════════════════

/// Registry of task handlers plus the launch/cancel/dispatch protocol.
///
/// Cheap to clone; clones share the same registry and worker pool.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<Inner>,
}

struct Inner {
    events: Arc<dyn EventBus>,
    store: Arc<dyn KvStore>,
    handlers: RwLock<HashMap<String, Arc<dyn OperationHandler>>>,
    settings: TaskSettings,
    timers: TaskTracker,
    pool: WorkerPool,
    lifecycle: Mutex<Lifecycle>,
}

/// Subscriber for [`TASK_EVENT`]. Holds the manager weakly since the bus it
/// is registered on is owned by the manager.
struct TaskEventHandler {
    inner: Weak<Inner>,
}

#[async_trait]
impl EventHandler for TaskEventHandler {
    async fn handle(&self, event: Event) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_event(event).await;
        }
    }
}

impl TaskManager {
    /// Create a manager and subscribe it to the bus's task events.
    pub fn new(events: Arc<dyn EventBus>, store: Arc<dyn KvStore>, settings: TaskSettings) -> Self {
        let inner = Arc::new(Inner {
            pool: WorkerPool::new(settings.queue_capacity),
            events,
            store,
            handlers: RwLock::new(HashMap::new()),
            settings,
            timers: TaskTracker::new(),
            lifecycle: Mutex::new(Lifecycle::Idle),
        });

        inner.events.on(
            TASK_EVENT,
            Arc::new(TaskEventHandler {
                inner: Arc::downgrade(&inner),
            }),
        );

        Self { inner }
    }

    pub fn settings(&self) -> &TaskSettings {
        &self.inner.settings
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────────────────────

    /// Register the handler for a task name.
    ///
    /// Fails with `DuplicateTask` if the name is taken and with
    /// `RegistrationClosed` once the manager has started.
    pub fn register(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn OperationHandler>,
    ) -> Result<()> {
        let name = name.into();
        if *self.inner.lifecycle.lock() != Lifecycle::Idle {
            return Err(TaskbusError::new(
                ErrorCode::RegistrationClosed,
                format!("cannot register task {} after start", name),
            ));
        }

        let mut handlers = self.inner.handlers.write();
        if handlers.contains_key(&name) {
            return Err(TaskbusError::duplicate_task(name));
        }
        debug!(task = %name, "Task registered");
        handlers.insert(name, handler);
        Ok(())
    }

    /// Whether a handler is registered under `name`.
    pub fn is_registered(&self, name: &str) -> bool {
        self.inner.handlers.read().contains_key(name)
    }

    /// Registered task names, sorted.
    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Schedule `name` for `id` after `delay_secs`, superseding any pending
    /// launch of the same key.
    ///
    /// The payload is written before the event is pushed. If the push fails
    /// the payload stays until its TTL expires and the launch is lost.
    pub async fn launch(
        &self,
        name: &str,
        id: impl Into<TaskId>,
        delay_secs: u64,
        data: Vec<u8>,
    ) -> Result<()> {
        let op = Operation::new(name, id);
        let payload = Payload::new(delay_secs, data);
        let key = op.key(&self.inner.settings.key_prefix);
        let ttl = Duration::from_secs(delay_secs)
            .checked_add(self.inner.settings.ttl_margin)
            .ok_or_else(|| {
                TaskbusError::invalid_config(format!("task delay {}s is out of range", delay_secs))
            })?;

        let encoded = serde_json::to_string(&payload)?;
        self.inner.store.set(&key, &encoded, ttl).await?;
        self.inner.events.push(TASK_EVENT, serde_json::to_vec(&op)?).await?;

        TaskMetrics::scheduled(name);
        info!(
            task = %op.name,
            id = %op.id,
            instance = %payload.id,
            delay_secs,
            "Task scheduled"
        );
        Ok(())
    }

    /// Drop the pending launch of `name` for `id`, if any. A timer already
    /// waiting for it will find the key empty and do nothing.
    pub async fn cancel(&self, name: &str, id: impl Into<TaskId>) -> Result<()> {
        let op = Operation::new(name, id);
        self.inner
            .store
            .del(&op.key(&self.inner.settings.key_prefix))
            .await?;

        TaskMetrics::canceled(name);
        info!(task = %op.name, id = %op.id, "Task canceled");
        Ok(())
    }

    /// Whether a launch of `name` for `id` is pending (scheduled, or past due
    /// but not yet collected by its timer).
    ///
    /// Only checks that the key holds a value; the payload is not decoded.
    pub async fn is_scheduled(&self, name: &str, id: impl Into<TaskId>) -> Result<bool> {
        let op = Operation::new(name, id);
        let raw = self
            .inner
            .store
            .get(&op.key(&self.inner.settings.key_prefix))
            .await?;
        Ok(raw.is_some())
    }

    /// The pending payload of `name` for `id`.
    pub async fn pending(&self, name: &str, id: impl Into<TaskId>) -> Result<Option<Payload>> {
        let op = Operation::new(name, id);
        self.inner
            .load_payload(&op.key(&self.inner.settings.key_prefix))
            .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Start the workers and begin consuming task events. Closes registration.
    pub fn start(&self) -> Result<()> {
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            if *lifecycle != Lifecycle::Idle {
                return Err(TaskbusError::new(
                    ErrorCode::InvalidStateTransition,
                    format!("task manager cannot start from {:?}", *lifecycle),
                ));
            }
            *lifecycle = Lifecycle::Running;
        }

        self.inner.pool.start(self.inner.settings.num_workers);
        self.inner.events.listen()?;

        info!(
            transport = self.inner.events.name(),
            workers = self.inner.settings.num_workers,
            tasks = self.inner.handlers.read().len(),
            "Task manager started"
        );
        Ok(())
    }

    /// Drain and stop.
    ///
    /// 1. stop the event consumer, so no new timers start;
    /// 2. wait for every pending timer to fire and resolve;
    /// 3. close the worker queue and wait for queued handlers to finish.
    ///
    /// No handler runs after this returns. A no-op unless running.
    pub async fn stop(&self) {
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            if *lifecycle != Lifecycle::Running {
                return;
            }
            *lifecycle = Lifecycle::Stopped;
        }

        info!(pending_timers = self.inner.timers.len(), "Task manager stopping");

        self.inner.events.stop().await;

        self.inner.timers.close();
        self.inner.timers.wait().await;

        self.inner.pool.shutdown().await;

        info!("Task manager stopped");
    }

    pub fn stats(&self) -> TaskStats {
        let pool = self.inner.pool.stats();
        TaskStats {
            executed: pool.executed(),
            failed: pool.failed(),
            panicked: pool.panicked(),
            pending_timers: self.inner.timers.len(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Dispatch
// ═══════════════════════════════════════════════════════════════════════════════

impl Inner {
    async fn load_payload(&self, key: &str) -> Result<Option<Payload>> {
        match self.store.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn on_event(self: Arc<Self>, event: Event) {
        let op: Operation = match serde_json::from_slice(&event.value) {
            Ok(op) => op,
            Err(e) => {
                error!(error = %e, "Dropping undecodable task event");
                return;
            }
        };
        let key = op.key(&self.settings.key_prefix);

        let current = match self.load_payload(&key).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                debug!(task = %op.name, id = %op.id, "Task no longer pending on receipt");
                return;
            }
            Err(e) => {
                error!(task = %op.name, id = %op.id, error = %e, "Cannot read task payload");
                return;
            }
        };

        let handler = self.handlers.read().get(&op.name).cloned();
        let Some(handler) = handler else {
            if let Err(e) = self.store.del(&key).await {
                warn!(
                    task = %op.name,
                    id = %op.id,
                    error = %e,
                    "Cannot delete unhandled task payload"
                );
            }
            TaskbusError::handler_not_found(&op.name).log();
            error!(task = %op.name, id = %op.id, "No handler registered for task; payload dropped");
            return;
        };

        debug!(
            task = %op.name,
            id = %op.id,
            instance = %current.id,
            delay_secs = current.delay,
            "Task event received"
        );

        TaskMetrics::timer_started();
        let inner = Arc::clone(&self);
        self.timers.spawn(async move {
            inner.fire(op, key, current, handler).await;
            TaskMetrics::timer_finished();
        });
    }

    async fn fire(
        &self,
        op: Operation,
        key: String,
        seen: Payload,
        handler: Arc<dyn OperationHandler>,
    ) {
        tokio::time::sleep(Duration::from_secs(seen.delay)).await;

        let current = match self.load_payload(&key).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                TaskMetrics::lost(&op.name);
                info!(
                    task = %op.name,
                    id = %op.id,
                    instance = %seen.id,
                    "Task canceled or expired before firing"
                );
                return;
            }
            Err(e) => {
                error!(task = %op.name, id = %op.id, error = %e, "Cannot read task payload");
                return;
            }
        };

        if current.id != seen.id {
            TaskMetrics::superseded(&op.name);
            debug!(
                task = %op.name,
                id = %op.id,
                instance = %seen.id,
                current = %current.id,
                "Task superseded"
            );
            return;
        }

        if let Err(e) = self.store.del(&key).await {
            warn!(task = %op.name, id = %op.id, error = %e, "Cannot delete fired task payload");
        }

        let (name, id) = (op.name.clone(), op.id.clone());
        let job = Job::new(
            name.clone(),
            id.clone(),
            Box::pin(async move { handler.run(op, current).await }),
        );
        if let Err(e) = self.pool.submit(job).await {
            error!(task = %name, id = %id, error = %e, "Task dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryEventBus;
    use crate::store::MemoryStore;
    use crate::tasks::operation_fn;

    fn manager() -> (TaskManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let manager = TaskManager::new(
            Arc::new(MemoryEventBus::new()),
            store.clone(),
            TaskSettings::default(),
        );
        (manager, store)
    }

    fn noop() -> Arc<dyn OperationHandler> {
        operation_fn(|_, _| async { Ok(()) })
    }

    #[tokio::test]
    async fn test_register_duplicate() {
        let (manager, _) = manager();
        manager.register("a", noop()).unwrap();
        let err = manager.register("a", noop()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DuplicateTask);
        assert!(manager.is_registered("a"));
        assert_eq!(manager.task_names(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_register_after_start() {
        let (manager, _) = manager();
        manager.start().unwrap();
        let err = manager.register("late", noop()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::RegistrationClosed);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_start_twice() {
        let (manager, _) = manager();
        manager.start().unwrap();
        let err = manager.start().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidStateTransition);
        manager.stop().await;

        let err = manager.start().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidStateTransition);
    }

    #[tokio::test]
    async fn test_stop_before_start_is_noop() {
        let (manager, _) = manager();
        manager.stop().await;
        manager.start().unwrap();
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_launch_writes_payload_with_ttl() {
        let (manager, store) = manager();
        manager.start().unwrap();

        manager.launch("t", 9, 60, b"\"x\"".to_vec()).await.unwrap();
        let raw = store.get("tasks:t:9").await.unwrap().unwrap();
        let payload: Payload = serde_json::from_str(&raw).unwrap();
        assert_eq!(payload.delay, 60);
        assert_eq!(payload.data, b"\"x\"");

        assert!(manager.is_scheduled("t", 9).await.unwrap());
        manager.cancel("t", 9).await.unwrap();
        assert!(!manager.is_scheduled("t", 9).await.unwrap());

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_launch_rejects_out_of_range_delay() {
        let (manager, store) = manager();
        manager.start().unwrap();

        let err = manager
            .launch("t", 1, u64::MAX, b"1".to_vec())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidConfiguration);
        assert!(store.get("tasks:t:1").await.unwrap().is_none());

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_is_scheduled_does_not_decode_payload() {
        let (manager, store) = manager();
        store.set("tasks:t:1", "{not json", Duration::ZERO).await.unwrap();

        assert!(manager.is_scheduled("t", 1).await.unwrap());
        assert!(manager.pending("t", 1).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregistered_task_payload_is_deleted() {
        let (manager, store) = manager();
        manager.start().unwrap();

        manager.launch("ghost", 1, 5, vec![]).await.unwrap();
        manager.stop().await;

        assert!(store.get("tasks:ghost:1").await.unwrap().is_none());
        assert_eq!(manager.stats(), TaskStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_corrupt_payload_is_not_executed() {
        let (manager, store) = manager();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        manager
            .register(
                "t",
                operation_fn(move |op, _| {
                    let tx = tx.clone();
                    async move {
                        let _ = tx.send(op.id);
                        Ok(())
                    }
                }),
            )
            .unwrap();
        manager.start().unwrap();

        manager.launch("t", 1, 5, vec![]).await.unwrap();
        store.set("tasks:t:1", "{not json", Duration::ZERO).await.unwrap();
        manager.stop().await;

        assert!(rx.try_recv().is_err());
        assert_eq!(manager.stats().executed, 0);
    }
}
