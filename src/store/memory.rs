//! Process-local counter store.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::{CounterStore, StoreError};

#[derive(Debug, Clone, Copy)]
struct Entry {
    count: u64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// An in-memory [`CounterStore`] with key expiry.
///
/// Useful for running the distributed strategy on a single node, and as a
/// stand-in for Redis in tests. Expired keys behave as absent and are
/// dropped lazily on their next increment or by [`MemoryCounterStore::purge_expired`].
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    entries: DashMap<String, Entry>,
}

impl MemoryCounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `key`, if it exists and has not expired.
    pub fn get(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.count)
    }

    /// Remaining time to live of `key`, if it exists and has an expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entry = self.entries.get(key)?;
        let at = entry.expires_at?;
        (now < at).then(|| at - now)
    }

    /// Remove every expired key, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.is_live(now));
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut entry = self.entries.entry(key.to_string()).or_insert(Entry {
            count: 0,
            expires_at: None,
        });

        if !entry.is_live(now) {
            *entry = Entry {
                count: 0,
                expires_at: None,
            };
        }

        entry.count += 1;
        Ok(entry.count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            // A TTL past the clock's range means the key never expires.
            entry.expires_at = Instant::now().checked_add(ttl);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn test_first_increment_sets_ttl() {
        let store = MemoryCounterStore::new();

        assert_eq!(store.increment_and_get_count("k", WINDOW).await, Ok(1));
        assert_eq!(store.ttl("k"), Some(WINDOW));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(store.increment_and_get_count("k", WINDOW).await, Ok(2));
        // Later increments leave the first expiry alone.
        assert_eq!(store.ttl("k"), Some(Duration::from_secs(50)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_restarts_after_expiry() {
        let store = MemoryCounterStore::new();

        for _ in 0..3 {
            store.increment_and_get_count("k", WINDOW).await.unwrap();
        }
        assert_eq!(store.get("k"), Some(3));

        tokio::time::advance(WINDOW).await;
        assert_eq!(store.get("k"), None);
        assert_eq!(store.increment_and_get_count("k", WINDOW).await, Ok(1));
    }

    #[tokio::test]
    async fn test_huge_ttl_does_not_overflow() {
        let store = MemoryCounterStore::new();
        let ttl = Duration::from_secs(i64::MAX as u64);

        assert_eq!(store.increment_and_get_count("k", ttl).await, Ok(1));
        assert_eq!(store.increment_and_get_count("k", ttl).await, Ok(2));
        assert_eq!(store.get("k"), Some(2));
    }

    #[tokio::test]
    async fn test_expire_on_missing_key_is_noop() {
        let store = MemoryCounterStore::new();
        store.expire("missing", WINDOW).await.unwrap();
        assert_eq!(store.get("missing"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = MemoryCounterStore::new();
        store.increment_and_get_count("short", Duration::from_secs(1)).await.unwrap();
        store.increment_and_get_count("long", WINDOW).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.get("long"), Some(1));
    }
}
