//! Composition root wiring a store, an event bus and a task manager.

use crate::config::{Transport, WorkerConfig};
use crate::error::{ErrorCode, ErrorContext, Result};
use crate::events::{EventBus, MemoryEventBus, RedisEventBus};
use crate::store::{KvStore, MemoryStore, RedisStore};
use crate::tasks::{TaskManager, TaskSettings};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// A configured scheduler instance.
///
/// Build one per process at startup, register tasks on [`Bus::tasks`], then
/// call [`Bus::start`]; call [`Bus::stop`] on shutdown.
pub struct Bus {
    protocol: &'static str,
    start_workers: bool,
    store: Arc<dyn KvStore>,
    events: Arc<dyn EventBus>,
    tasks: TaskManager,
}

impl Bus {
    /// Connect the backends selected by `config.dsn`.
    pub async fn from_config(config: &WorkerConfig) -> Result<Self> {
        let transport = config.transport()?;
        let settings = TaskSettings::from(config);

        let (store, events): (Arc<dyn KvStore>, Arc<dyn EventBus>) = match &transport {
            Transport::Memory => (Arc::new(MemoryStore::new()), Arc::new(MemoryEventBus::new())),
            Transport::Redis(target) => {
                let client = redis::Client::open(target.url())
                    .with_error_code(ErrorCode::InvalidConfiguration)?;
                let store = RedisStore::connect(client.clone(), config.namespace.clone()).await?;
                let events = RedisEventBus::connect(
                    client,
                    config.events_list.clone(),
                    Duration::from_secs(config.poll_timeout_secs),
                )
                .await?;
                (Arc::new(store), Arc::new(events))
            }
        };

        // Nothing outside this process can consume an in-memory bus.
        let start_workers = config.start_worker || transport == Transport::Memory;

        info!(
            transport = %transport,
            workers = settings.num_workers,
            start_workers,
            "Bus configured"
        );

        let tasks = TaskManager::new(Arc::clone(&events), Arc::clone(&store), settings);
        Ok(Self {
            protocol: transport.protocol(),
            start_workers,
            store,
            events,
            tasks,
        })
    }

    /// Wire caller-supplied backends. Workers always start.
    pub fn with_backends(
        store: Arc<dyn KvStore>,
        events: Arc<dyn EventBus>,
        settings: TaskSettings,
    ) -> Self {
        let tasks = TaskManager::new(Arc::clone(&events), Arc::clone(&store), settings);
        Self {
            protocol: events.name(),
            start_workers: true,
            store,
            events,
            tasks,
        }
    }

    /// `"memory"` or `"redis"`.
    pub fn protocol(&self) -> &'static str {
        self.protocol
    }

    pub fn tasks(&self) -> &TaskManager {
        &self.tasks
    }

    pub fn events(&self) -> &Arc<dyn EventBus> {
        &self.events
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Whether [`Bus::start`] runs the consumer and workers in this process.
    pub fn should_start_workers(&self) -> bool {
        self.start_workers
    }

    /// Start consuming and executing tasks, unless this process only
    /// launches them.
    pub fn start(&self) -> Result<()> {
        if !self.start_workers {
            info!(protocol = self.protocol, "Workers disabled; launching only");
            return Ok(());
        }
        self.tasks.start()
    }

    /// Two-phase drain; see [`TaskManager::stop`].
    pub async fn stop(&self) {
        self.tasks.stop().await;
    }
}
