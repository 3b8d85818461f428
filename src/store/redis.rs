//! Redis-backed counter store.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, ErrorKind, RedisError, Script};
use tracing::info;

use super::{CounterStore, StoreError};

/// INCR and the first-hit PEXPIRE in one server-side step.
const INCREMENT_WITH_EXPIRY: &str = r#"
local current = redis.call('INCR', KEYS[1])
if current == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return current
"#;

/// A [`CounterStore`] shared through Redis.
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
    script: Script,
    atomic_expiry: bool,
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("atomic_expiry", &self.atomic_expiry)
            .finish()
    }
}

impl RedisCounterStore {
    /// Connect to the Redis server at `url`.
    ///
    /// With `atomic_expiry` set, increments run as a Lua script so a counter
    /// can never be left without its expiry. Without it the store issues
    /// INCR and PEXPIRE as separate commands.
    pub async fn connect(url: &str, atomic_expiry: bool) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Connection(format!("Invalid Redis URL: {e}")))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to connect to Redis: {e}")))?;

        info!(atomic_expiry, "Connected to Redis counter store");

        Ok(Self {
            conn,
            script: Script::new(INCREMENT_WITH_EXPIRY),
            atomic_expiry,
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.incr(key, 1u64).await.map_err(map_redis_error)?;
        Ok(count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .pexpire(key, ttl_millis(ttl))
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn increment_and_get_count(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        if !self.atomic_expiry {
            let count = self.increment(key).await?;
            if count == 1 {
                self.expire(key, ttl).await?;
            }
            return Ok(count);
        }

        let mut conn = self.conn.clone();
        self.script
            .key(key)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)
    }
}

/// PEXPIRE argument for `ttl`; Redis rejects zero.
fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1)
}

fn map_redis_error(err: RedisError) -> StoreError {
    if err.is_timeout() || err.is_connection_dropped() || err.is_connection_refusal() {
        return StoreError::Connection(err.to_string());
    }
    match err.kind() {
        ErrorKind::IoError => StoreError::Connection(err.to_string()),
        _ => StoreError::Query(err.to_string()),
    }
}
