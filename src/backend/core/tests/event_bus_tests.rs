//! Tests for the event bus implementations.
//!
//! Tests cover:
//! - Delivery to the handler registered for an event name
//! - Ordering on the in-process bus
//! - Back-pressure before the consumer starts
//! - Lifecycle errors (listen twice, push after stop)
//! - Redis work-queue delivery (ignored without REDIS_URL)

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use taskbus_core::error::ErrorCode;
use taskbus_core::events::{handler_fn, Event, EventBus, MemoryEventBus, RedisEventBus};

// ============================================================================
// Helpers
// ============================================================================

fn collect(bus: &dyn EventBus, name: &str) -> Arc<Mutex<Vec<Event>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.on(
        name,
        handler_fn(move |event| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push(event);
            }
        }),
    );
    seen
}

// ============================================================================
// In-Process Bus
// ============================================================================

#[tokio::test]
async fn test_memory_bus_preserves_order() {
    let bus = MemoryEventBus::new();
    let seen = collect(&bus, "n");
    bus.listen().unwrap();

    for i in 0..50u8 {
        bus.push("n", vec![i]).await.unwrap();
    }
    bus.stop().await;

    let got: Vec<u8> = seen.lock().iter().map(|e| e.value[0]).collect();
    assert_eq!(got, (0..50u8).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_memory_bus_routes_by_name() {
    let bus = MemoryEventBus::new();
    let a = collect(&bus, "a");
    let b = collect(&bus, "b");
    bus.listen().unwrap();

    bus.push("a", b"1".to_vec()).await.unwrap();
    bus.push("b", b"2".to_vec()).await.unwrap();
    bus.push("c", b"3".to_vec()).await.unwrap();
    bus.stop().await;

    assert_eq!(a.lock().len(), 1);
    assert_eq!(b.lock().len(), 1);
    assert_eq!(b.lock()[0].value, b"2");
}

#[tokio::test(start_paused = true)]
async fn test_memory_push_waits_for_consumer() {
    let bus = Arc::new(MemoryEventBus::new());
    let seen = collect(bus.as_ref(), "e");

    // The single slot takes one event; the next push waits for a consumer.
    bus.push("e", b"first".to_vec()).await.unwrap();
    let blocked =
        tokio::time::timeout(Duration::from_millis(100), bus.push("e", b"second".to_vec())).await;
    assert!(blocked.is_err());

    bus.listen().unwrap();
    tokio::time::timeout(Duration::from_secs(1), bus.push("e", b"third".to_vec()))
        .await
        .unwrap()
        .unwrap();
    bus.stop().await;

    let got: Vec<Vec<u8>> = seen.lock().iter().map(|e| e.value.clone()).collect();
    assert_eq!(got, vec![b"first".to_vec(), b"third".to_vec()]);
}

#[tokio::test]
async fn test_memory_bus_lifecycle_errors() {
    let bus = MemoryEventBus::new();
    bus.listen().unwrap();
    assert_eq!(bus.listen().unwrap_err().code(), ErrorCode::AlreadyListening);

    bus.stop().await;
    assert_eq!(
        bus.push("x", vec![]).await.unwrap_err().code(),
        ErrorCode::EventBusClosed
    );
}

#[tokio::test]
async fn test_memory_bus_late_handler_is_ignored() {
    let bus = MemoryEventBus::new();
    bus.listen().unwrap();
    let late = collect(&bus, "late");

    bus.push("late", vec![1]).await.unwrap();
    bus.stop().await;

    assert!(late.lock().is_empty());
}

// ============================================================================
// Redis Bus
// ============================================================================

fn redis_client() -> redis::Client {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/15".into());
    redis::Client::open(url).unwrap()
}

#[tokio::test]
#[ignore = "requires a running redis (REDIS_URL)"]
async fn test_redis_work_queue_delivers_once() {
    let list = format!("taskbus-it-{}", uuid::Uuid::new_v4());
    let first = RedisEventBus::connect(redis_client(), list.clone(), Duration::from_secs(1))
        .await
        .unwrap();
    let second = RedisEventBus::connect(redis_client(), list.clone(), Duration::from_secs(1))
        .await
        .unwrap();
    let seen_first = collect(&first, "job");
    let seen_second = collect(&second, "job");
    first.listen().unwrap();
    second.listen().unwrap();

    for i in 0..20u8 {
        first.push("job", vec![i]).await.unwrap();
    }

    tokio::time::timeout(Duration::from_secs(10), async {
        while seen_first.lock().len() + seen_second.lock().len() < 20 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    first.stop().await;
    second.stop().await;

    let mut all: Vec<u8> = seen_first
        .lock()
        .iter()
        .chain(seen_second.lock().iter())
        .map(|e| e.value[0])
        .collect();
    all.sort();
    assert_eq!(all, (0..20u8).collect::<Vec<_>>());
}

#[tokio::test]
#[ignore = "requires a running redis (REDIS_URL)"]
async fn test_redis_stop_is_bounded_by_poll_timeout() {
    let list = format!("taskbus-it-{}", uuid::Uuid::new_v4());
    let bus = RedisEventBus::connect(redis_client(), list, Duration::from_secs(1))
        .await
        .unwrap();
    bus.listen().unwrap();

    let started = std::time::Instant::now();
    bus.stop().await;
    assert!(started.elapsed() < Duration::from_secs(3));
}
