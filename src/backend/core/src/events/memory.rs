use super::{Event, EventBus, EventHandler, HandlerRegistry};
use crate::error::{ErrorCode, Result, TaskbusError};
use crate::telemetry::EventMetrics;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

const TRANSPORT: &str = "memory";

/// In-process event bus backed by a single-slot channel.
///
/// The queue holds one event rather than handing off directly: `push`
/// returns once its event is queued, which may be before the consumer has
/// taken it. A second `push` waits while the slot is occupied, so producers
/// are still paced by the consumer loop and at most one accepted event is
/// pending at any time. Events pushed before `listen` sit in the slot until the
/// loop starts; `stop` closes the channel, lets the loop drain what was
/// already accepted, and waits for it to exit.
pub struct MemoryEventBus {
    handlers: Arc<HandlerRegistry>,
    sender: Mutex<Option<mpsc::Sender<Event>>>,
    receiver: Mutex<Option<mpsc::Receiver<Event>>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEventBus {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            handlers: Arc::new(HandlerRegistry::default()),
            sender: Mutex::new(Some(tx)),
            receiver: Mutex::new(Some(rx)),
            consumer: Mutex::new(None),
        }
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    fn listen(&self) -> Result<()> {
        let mut rx = self.receiver.lock().take().ok_or_else(|| {
            TaskbusError::new(ErrorCode::AlreadyListening, "memory event bus is already listening")
        })?;

        self.handlers.seal();
        let handlers = Arc::clone(&self.handlers);

        let handle = tokio::spawn(async move {
            debug!(transport = TRANSPORT, "Event consumer started");
            while let Some(event) = rx.recv().await {
                handlers.dispatch(TRANSPORT, event).await;
            }
            debug!(transport = TRANSPORT, "Event consumer stopped");
        });

        *self.consumer.lock() = Some(handle);
        Ok(())
    }

    async fn stop(&self) {
        drop(self.sender.lock().take());

        let handle = self.consumer.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(transport = TRANSPORT, error = %e, "Event consumer terminated abnormally");
            }
        }
    }

    async fn push(&self, name: &str, value: Vec<u8>) -> Result<()> {
        let sender = self.sender.lock().clone().ok_or_else(|| {
            TaskbusError::new(ErrorCode::EventBusClosed, "memory event bus is stopped")
        })?;

        sender
            .send(Event::new(name, value))
            .await
            .map_err(|_| {
                TaskbusError::new(ErrorCode::EventBusClosed, "memory event bus is stopped")
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::handler_fn;
    use tokio::sync::mpsc::unbounded_channel;

    fn recorder(bus: &MemoryEventBus, name: &str) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = unbounded_channel();
        bus.on(
            name,
            handler_fn(move |e| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(e);
                }
            }),
        );
        rx
    }

    #[tokio::test]
    async fn test_push_delivers_to_handler() {
        let bus = MemoryEventBus::new();
        let mut rx = recorder(&bus, "greet");
        bus.listen().unwrap();

        bus.push("greet", b"hello".to_vec()).await.unwrap();
        bus.push("ignored", b"nobody listens".to_vec()).await.unwrap();
        bus.stop().await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, "greet");
        assert_eq!(event.value, b"hello");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_listen_twice_fails() {
        let bus = MemoryEventBus::new();
        bus.listen().unwrap();
        let err = bus.listen().unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadyListening);
        bus.stop().await;
    }

    #[tokio::test]
    async fn test_push_after_stop_fails() {
        let bus = MemoryEventBus::new();
        bus.listen().unwrap();
        bus.stop().await;

        let err = bus.push("x", vec![]).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::EventBusClosed);

        // stopping again is harmless
        bus.stop().await;
    }

    #[tokio::test]
    async fn test_stop_drains_accepted_events() {
        let bus = MemoryEventBus::new();
        let mut rx = recorder(&bus, "e");

        // accepted into the slot before the consumer exists
        bus.push("e", b"1".to_vec()).await.unwrap();
        bus.listen().unwrap();
        bus.push("e", b"2".to_vec()).await.unwrap();
        bus.stop().await;

        assert_eq!(rx.recv().await.unwrap().value, b"1");
        assert_eq!(rx.recv().await.unwrap().value, b"2");
    }

    #[tokio::test]
    async fn test_stop_before_listen() {
        let bus = MemoryEventBus::new();
        bus.stop().await;
        assert!(bus.push("x", vec![]).await.is_err());
    }
}
