//! Shared counter stores for the distributed strategy.

use std::time::Duration;

use async_trait::async_trait;

pub mod memory;
pub mod redis;

pub use memory::MemoryCounterStore;
pub use self::redis::RedisCounterStore;

/// Errors that can occur in counter stores.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store did not answer within the configured deadline.
    #[error("Counter store timed out after {0:?}")]
    Timeout(Duration),

    /// The store could not be reached.
    #[error("Counter store connection failed: {0}")]
    Connection(String),

    /// The store rejected or failed a command.
    #[error("Counter store query failed: {0}")]
    Query(String),
}

/// An external counter shared by every service instance.
///
/// Window boundaries live in the store: a counter starts when its key is
/// first incremented and ends when the key expires.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key` by one and return the new value.
    async fn increment(&self, key: &str) -> Result<u64, StoreError>;

    /// Set `key` to expire after `ttl`.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Increment `key`, setting its expiry when this is the first increment.
    ///
    /// The default implementation issues two separate commands, so a crash
    /// between them leaves a counter that never expires. Stores with a
    /// scripting primitive should override it with a single atomic call.
    async fn increment_and_get_count(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let count = self.increment(key).await?;
        if count == 1 {
            self.expire(key, ttl).await?;
        }
        Ok(count)
    }
}
