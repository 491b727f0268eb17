use super::KvStore;
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
    /// Write sequence number; a deferred expiry only removes the write that
    /// scheduled it.
    generation: u64,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

type Entries = Mutex<HashMap<String, Entry>>;

/// In-process store for single-process deployments and tests.
///
/// Never fails. Expired entries are removed by a deferred task scheduled on
/// `set`, and reads treat past-deadline entries as absent even if that task
/// has not run yet.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Arc<Entries>,
    generation: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every key.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn schedule_expiry(entries: Weak<Entries>, key: String, generation: u64, deadline: Instant) {
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let Some(entries) = entries.upgrade() else {
                return;
            };
            let mut map = entries.lock();
            if map.get(&key).map(|e| e.generation) == Some(generation) {
                map.remove(&key);
                trace!(key = %key, "Expired memory store key");
            }
        });
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let mut map = self.entries.lock();

        match map.get(key) {
            Some(entry) if !entry.is_live(now) => {
                map.remove(key);
                Ok(None)
            }
            Some(entry) if !entry.value.is_empty() => Ok(Some(entry.value.clone())),
            _ => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        // A TTL past the clock's range never expires.
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Instant::now().checked_add(ttl)
        };

        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
                generation,
            },
        );

        if let Some(deadline) = expires_at {
            Self::schedule_expiry(
                Arc::downgrade(&self.entries),
                key.to_string(),
                generation,
                deadline,
            );
        }

        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_del() {
        let store = MemoryStore::new();
        assert_eq!(store.get("a").await.unwrap(), None);

        store.set("a", "1", Duration::ZERO).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));

        store.set("a", "2", Duration::ZERO).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("2"));

        store.del("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);

        // deleting again is fine
        store.del("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_value_is_absent() {
        let store = MemoryStore::new();
        store.set("a", "", Duration::ZERO).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_beyond_clock_range_never_expires() {
        let store = MemoryStore::new();
        store.set("a", "1", Duration::MAX).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let store = MemoryStore::new();
        store.set("a", "1", Duration::from_secs(5)).await.unwrap();

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(store.get("a").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_does_not_remove_newer_write() {
        let store = MemoryStore::new();
        store.set("a", "old", Duration::from_secs(5)).await.unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;
        store.set("a", "new", Duration::ZERO).await.unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_clear() {
        let store = MemoryStore::new();
        store.set("a", "1", Duration::ZERO).await.unwrap();
        store.set("b", "2", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.len(), 2);

        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.get("b").await.unwrap(), None);
    }
}
