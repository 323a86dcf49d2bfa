//! Redis-backed counter store.
//!
//! Counters live in Redis so that every Warden instance pointed at the same
//! server shares one view of each window. Expiry is enforced by Redis itself
//! (`PX` on creation), and increments use Redis' native atomic `INCR`.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::backend::CounterStore;
use crate::error::StoreError;

/// Increment only if the key is live, so an expired window is never
/// resurrected without a TTL. Returns 0 for a missing key.
const INCREMENT_IF_EXISTS: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return redis.call('INCR', KEYS[1])
end
return 0
"#;

/// Connection settings for [`RedisStore`].
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis connection URL, e.g. `redis://127.0.0.1:6379`
    pub url: String,
    /// Upper bound for establishing the connection
    pub connect_timeout: Duration,
    /// Upper bound for a single command round trip
    pub command_timeout: Duration,
}

/// A counter store backed by a shared Redis server.
///
/// The connection is established lazily on first use, so an unreachable
/// server surfaces as a [`StoreError`] on the first decision rather than at
/// startup. The underlying [`ConnectionManager`] reconnects on its own.
pub struct RedisStore {
    client: Client,
    connection: OnceCell<ConnectionManager>,
    increment_script: Script,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("connected", &self.connection.initialized())
            .field("connect_timeout", &self.connect_timeout)
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

impl RedisStore {
    /// Create a store for the given configuration.
    ///
    /// Only the URL is validated here; no connection is attempted.
    pub fn new(config: &RedisStoreConfig) -> Result<Self, StoreError> {
        let client = Client::open(config.url.as_str())?;
        Ok(Self {
            client,
            connection: OnceCell::new(),
            increment_script: Script::new(INCREMENT_IF_EXISTS),
            connect_timeout: config.connect_timeout,
            command_timeout: config.command_timeout,
        })
    }

    /// Get a handle to the shared connection, connecting if needed.
    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                let manager = with_timeout(
                    self.connect_timeout,
                    ConnectionManager::new(self.client.clone()),
                )
                .await?;
                info!("Connected to Redis counter store");
                Ok::<_, StoreError>(manager)
            })
            .await?;
        Ok(manager.clone())
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);

        let value: Option<u64> =
            with_timeout(self.command_timeout, cmd.query_async(&mut conn)).await?;
        Ok(value)
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: u64,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl));

        let reply: Option<String> =
            with_timeout(self.command_timeout, cmd.query_async(&mut conn)).await?;
        let created = reply.is_some();
        if !created {
            debug!(key = %key, "Counter already initialized in Redis");
        }
        Ok(created)
    }

    async fn increment(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let mut conn = self.connection().await?;
        let invocation = self.increment_script.key(key);
        let value: u64 =
            with_timeout(self.command_timeout, invocation.invoke_async(&mut conn)).await?;
        Ok((value > 0).then_some(value))
    }
}

/// Convert a window into a Redis `PX` argument.
///
/// Redis rejects a zero expiry, so sub-millisecond windows round up.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Run a Redis future under a deadline.
async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(url: &str) -> RedisStoreConfig {
        RedisStoreConfig {
            url: url.to_string(),
            connect_timeout: Duration::from_millis(200),
            command_timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn test_ttl_millis() {
        assert_eq!(ttl_millis(Duration::from_secs(60)), 60_000);
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
        assert_eq!(ttl_millis(Duration::ZERO), 1);
    }

    #[test]
    fn test_invalid_url_rejected() {
        let result = RedisStore::new(&test_config("not a url"));
        assert!(matches!(result, Err(StoreError::Redis(_))));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_an_error() {
        // Port 1 is reserved and nothing listens on it
        let store = RedisStore::new(&test_config("redis://127.0.0.1:1")).unwrap();

        let result = store.get("key").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_timeout_maps_to_store_error() {
        let result: Result<(), StoreError> = with_timeout(
            Duration::from_millis(10),
            std::future::pending::<redis::RedisResult<()>>(),
        )
        .await;

        assert!(matches!(result, Err(StoreError::Timeout(_))));
    }

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server (REDIS_URL)"]
    async fn test_redis_counter_lifecycle() {
        let store = RedisStore::new(&test_config(&redis_url())).unwrap();
        let key = format!("warden_test_lifecycle_{}", std::process::id());

        assert_eq!(store.get(&key).await.unwrap(), None);
        assert_eq!(store.increment(&key).await.unwrap(), None);

        assert!(store
            .set_with_expiry(&key, 1, Duration::from_secs(60))
            .await
            .unwrap());
        assert!(!store
            .set_with_expiry(&key, 1, Duration::from_secs(60))
            .await
            .unwrap());

        assert_eq!(store.increment(&key).await.unwrap(), Some(2));
        assert_eq!(store.get(&key).await.unwrap(), Some(2));
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server (REDIS_URL)"]
    async fn test_redis_counter_expires() {
        let store = RedisStore::new(&test_config(&redis_url())).unwrap();
        let key = format!("warden_test_expiry_{}", std::process::id());

        store
            .set_with_expiry(&key, 1, Duration::from_millis(100))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(store.get(&key).await.unwrap(), None);
        assert_eq!(store.increment(&key).await.unwrap(), None);
    }
}
