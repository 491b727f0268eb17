//! Namespaced, TTL-capable string store.
//!
//! The scheduler keeps one pending payload per task key here. Two
//! interchangeable backends are provided:
//! - **MemoryStore**: mutex-guarded map with deferred per-key expiry
//! - **RedisStore**: namespaced keys with native Redis TTLs

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Key/value storage primitive shared by every scheduler process.
///
/// Implementations must be safe for concurrent `get`/`set`/`del` from any
/// number of callers.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a key. An absent key and an empty value both yield `None`.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a key, replacing any previous value. A zero `ttl` means the
    /// value never expires.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Delete a key. Deleting an absent key is not an error.
    async fn del(&self, key: &str) -> Result<()>;

    /// Get the backend name.
    fn name(&self) -> &'static str;
}
