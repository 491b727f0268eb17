//! Named publish/subscribe channel for small opaque messages.
//!
//! - **MemoryEventBus**: in-process blocking queue, single process only
//! - **RedisEventBus**: Redis list consumed with blocking pops, shared by
//!   every worker process (work-queue semantics: one consumer per message)
//! - **RecordingEventBus**: records pushes without delivering them, for tests
//!
//! Messages whose name has no registered handler are dropped by the bus.

mod memory;
mod recording;
mod redis;

pub use self::memory::MemoryEventBus;
pub use self::recording::RecordingEventBus;
pub use self::redis::RedisEventBus;

use crate::error::Result;
use crate::telemetry::EventMetrics;
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Event
// ═══════════════════════════════════════════════════════════════════════════════

/// A message carried by the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,
}

impl Event {
    pub fn new(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Serde adapter storing bytes as a base64 string.
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Handlers
// ═══════════════════════════════════════════════════════════════════════════════

/// Callback invoked for every delivered event with a matching name.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event);
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> BoxFuture<'static, ()> + Send + Sync,
{
    async fn handle(&self, event: Event) {
        (self.0)(event).await
    }
}

/// Wrap an async closure as an [`EventHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(FnHandler(move |event| -> BoxFuture<'static, ()> { Box::pin(f(event)) }))
}

/// Name to handler table shared by a bus and its consumer loop.
///
/// Sealed once the bus starts listening; later registrations are ignored.
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn EventHandler>>>,
    sealed: AtomicBool,
}

impl HandlerRegistry {
    pub(crate) fn register(&self, name: &str, handler: Arc<dyn EventHandler>) {
        if self.sealed.load(Ordering::Acquire) {
            warn!(event = %name, "Event handler registered after listen; ignoring");
            return;
        }
        self.handlers.write().insert(name.to_string(), handler);
    }

    pub(crate) fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    pub(crate) async fn dispatch(&self, transport: &'static str, event: Event) {
        let handler = self.handlers.read().get(&event.name).cloned();
        match handler {
            Some(handler) => {
                debug!(event = %event.name, transport, "Event received");
                EventMetrics::received(transport, &event.name);
                handler.handle(event).await;
            }
            None => debug!(event = %event.name, transport, "No handler for event"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Event Bus
// ═══════════════════════════════════════════════════════════════════════════════

/// Publish/subscribe transport.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Start the consumer loop in the background. Fails if already listening.
    fn listen(&self) -> Result<()>;

    /// Stop consuming and wait for the consumer loop to exit.
    async fn stop(&self);

    /// Publish an event; may wait until the transport accepts it.
    async fn push(&self, name: &str, value: Vec<u8>) -> Result<()>;

    /// Register the handler for an event name. Must happen before `listen`.
    fn on(&self, name: &str, handler: Arc<dyn EventHandler>);

    /// Get the transport name.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = Event::new("task", b"{\"name\":\"t\"}".to_vec());
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"name":"task","value":"eyJuYW1lIjoidCJ9"}"#);

        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_event_null_value() {
        let event: Event = serde_json::from_str(r#"{"name":"ping","value":null}"#).unwrap();
        assert!(event.value.is_empty());
    }

    #[tokio::test]
    async fn test_registry_ignores_late_registration() {
        let registry = HandlerRegistry::default();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let tx_early = tx.clone();
        registry.register(
            "a",
            handler_fn(move |e: Event| {
                let tx = tx_early.clone();
                async move {
                    let _ = tx.send(e.name);
                }
            }),
        );
        registry.seal();
        registry.register(
            "b",
            handler_fn(move |e: Event| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(e.name);
                }
            }),
        );

        registry.dispatch("memory", Event::new("a", vec![])).await;
        registry.dispatch("memory", Event::new("b", vec![])).await;

        assert_eq!(rx.recv().await.as_deref(), Some("a"));
        assert!(rx.try_recv().is_err());
    }
}
