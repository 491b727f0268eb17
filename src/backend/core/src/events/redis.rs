use super::{Event, EventBus, EventHandler, HandlerRegistry};
use crate::error::{ErrorCode, ErrorContext, Result, TaskbusError};
use crate::telemetry::EventMetrics;
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const TRANSPORT: &str = "redis";

/// Pause before reconnecting after a failed poll.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Redis list used as a durable work queue.
///
/// `push` appends with `RPUSH`; the consumer loop pops with `BLPOP` on a
/// dedicated connection. Several processes may consume the same list and
/// each event is delivered to exactly one of them. The pop timeout bounds
/// how long `stop` waits for the loop to notice cancellation.
pub struct RedisEventBus {
    client: redis::Client,
    conn: ConnectionManager,
    list: String,
    poll_timeout: Duration,
    handlers: Arc<HandlerRegistry>,
    shutdown: CancellationToken,
    consumer: Mutex<Option<JoinHandle<()>>>,
    listening: std::sync::atomic::AtomicBool,
}

impl RedisEventBus {
    /// Connect the publishing side; the consumer connects on `listen`.
    pub async fn connect(
        client: redis::Client,
        list: impl Into<String>,
        poll_timeout: Duration,
    ) -> Result<Self> {
        let conn = ConnectionManager::new(client.clone())
            .await
            .with_error_code(ErrorCode::StoreConnectionFailed)?;

        let list = list.into();
        info!(list = %list, "Redis event bus connected");

        Ok(Self {
            client,
            conn,
            list,
            poll_timeout,
            handlers: Arc::new(HandlerRegistry::default()),
            shutdown: CancellationToken::new(),
            consumer: Mutex::new(None),
            listening: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// Number of events waiting in the list.
    pub async fn backlog(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = redis::cmd("LLEN").arg(&self.list).query_async(&mut conn).await?;
        Ok(len)
    }
}

struct Consumer {
    client: redis::Client,
    list: String,
    poll_timeout: Duration,
    handlers: Arc<HandlerRegistry>,
    shutdown: CancellationToken,
}

impl Consumer {
    async fn run(self) {
        debug!(transport = TRANSPORT, list = %self.list, "Event consumer started");
        let mut conn: Option<MultiplexedConnection> = None;

        while !self.shutdown.is_cancelled() {
            let mut active = match conn.take() {
                Some(c) => c,
                None => match self.client.get_multiplexed_async_connection().await {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(
                            transport = TRANSPORT,
                            error = %e,
                            "Event consumer failed to connect"
                        );
                        self.backoff().await;
                        continue;
                    }
                },
            };

            // BLPOP is not raced against the shutdown token so a popped
            // event is always dispatched.
            let popped: redis::RedisResult<Option<(String, String)>> = redis::cmd("BLPOP")
                .arg(&self.list)
                .arg(self.poll_timeout.as_secs().max(1))
                .query_async(&mut active)
                .await;

            match popped {
                Ok(Some((_, raw))) => {
                    conn = Some(active);
                    match serde_json::from_str::<Event>(&raw) {
                        Ok(event) => self.handlers.dispatch(TRANSPORT, event).await,
                        Err(e) => error!(
                            transport = TRANSPORT,
                            error = %e,
                            "Dropping undecodable event"
                        ),
                    }
                }
                Ok(None) => conn = Some(active),
                Err(e) => {
                    warn!(transport = TRANSPORT, error = %e, "Event poll failed");
                    self.backoff().await;
                }
            }
        }

        debug!(transport = TRANSPORT, list = %self.list, "Event consumer stopped");
    }

    async fn backoff(&self) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
        }
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    fn listen(&self) -> Result<()> {
        use std::sync::atomic::Ordering;

        if self.listening.swap(true, Ordering::AcqRel) {
            return Err(TaskbusError::new(
                ErrorCode::AlreadyListening,
                "redis event bus is already listening",
            ));
        }

        self.handlers.seal();
        let consumer = Consumer {
            client: self.client.clone(),
            list: self.list.clone(),
            poll_timeout: self.poll_timeout,
            handlers: Arc::clone(&self.handlers),
            shutdown: self.shutdown.clone(),
        };
        *self.consumer.lock() = Some(tokio::spawn(consumer.run()));
        Ok(())
    }

    async fn stop(&self) {
        self.shutdown.cancel();

        let handle = self.consumer.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(transport = TRANSPORT, error = %e, "Event consumer terminated abnormally");
            }
        }

        // Whatever is left stays queued for the other consumers.
        match self.backlog().await {
            Ok(backlog) => {
                info!(transport = TRANSPORT, list = %self.list, backlog, "Event bus stopped")
            }
            Err(e) => debug!(transport = TRANSPORT, error = %e, "Cannot read event backlog"),
        }
    }

    async fn push(&self, name: &str, value: Vec<u8>) -> Result<()> {
        let payload = serde_json::to_string(&Event::new(name, value))?;

        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("RPUSH")
            .arg(&self.list)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                TaskbusError::with_internal(
                    ErrorCode::EventBusError,
                    "Failed to publish event",
                    e.to_string(),
                )
                .with_source(e)
            })?;

        EventMetrics::pushed(TRANSPORT, name);
        Ok(())
    }

    fn on(&self, name: &str, handler: Arc<dyn EventHandler>) {
        self.handlers.register(name, handler);
    }

    fn name(&self) -> &'static str {
        TRANSPORT
    }
}
