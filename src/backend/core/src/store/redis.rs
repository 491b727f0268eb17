use super::KvStore;
use crate::error::{ErrorCode, Result, TaskbusError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::info;

/// Redis-backed store. Every key is stored as `namespace:key`.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    namespace: String,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl RedisStore {
    /// Connect and verify the server answers `PING`.
    pub async fn connect(client: redis::Client, namespace: impl Into<String>) -> Result<Self> {
        let conn = ConnectionManager::new(client).await.map_err(|e| {
            TaskbusError::with_internal(
                ErrorCode::StoreConnectionFailed,
                "Failed to connect to redis",
                e.to_string(),
            )
        })?;

        let store = Self {
            conn,
            namespace: namespace.into(),
        };
        store.ping().await?;

        info!(namespace = %store.namespace, "Redis store connected");
        Ok(store)
    }

    /// Round-trip a `PING` to the server.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await.map_err(|e| {
            TaskbusError::with_internal(
                ErrorCode::StoreConnectionFailed,
                "Redis ping failed",
                e.to_string(),
            )
        })?;
        Ok(())
    }

    /// Build the full key with namespace.
    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }
}

/// Longest `PX` accepted; Redis rejects expiries whose absolute time
/// overflows a signed 64-bit millisecond clock.
const MAX_TTL_MILLIS: u64 = (i64::MAX / 2) as u64;

/// Millisecond precision keeps sub-second TTLs meaningful.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis())
        .unwrap_or(u64::MAX)
        .clamp(1, MAX_TTL_MILLIS)
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(self.full_key(key)).await?;
        Ok(value.filter(|v| !v.is_empty()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.full_key(key)).arg(value);
        if !ttl.is_zero() {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(self.full_key(key)).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connect() -> RedisStore {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/15".into());
        let client = redis::Client::open(url).unwrap();
        RedisStore::connect(client, format!("taskbus-test-{}", uuid::Uuid::new_v4()))
            .await
            .unwrap()
    }

    #[test]
    fn test_ttl_millis_clamps() {
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
        assert_eq!(ttl_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(ttl_millis(Duration::MAX), MAX_TTL_MILLIS);
        assert_eq!(ttl_millis(Duration::from_secs(u64::MAX / 1000)), MAX_TTL_MILLIS);
    }

    #[tokio::test]
    #[ignore = "requires a running redis (REDIS_URL)"]
    async fn test_redis_set_get_del() {
        let store = connect().await;
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", "v", Duration::ZERO).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        store.del("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore = "requires a running redis (REDIS_URL)"]
    async fn test_redis_ttl() {
        let store = connect().await;
        store.set("k", "v", Duration::from_millis(200)).await.unwrap();
        assert!(store.get("k").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
