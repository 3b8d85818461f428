//! Distributed rate limiter backed by a shared counter store.
//!
//! Every instance of the service increments the same store keys, so the
//! global and per-client budgets are shared across the fleet. Windows are
//! implicit in the store: a key's counter lives until its TTL runs out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, trace};

use super::backend::RateLimiterBackend;
use super::budget::{charge_tiers, RemoteBudget, RemoteScope};
use super::decision::RateDecision;
use super::key::ClientKey;
use super::local::TierLimits;
use crate::store::{CounterStore, StoreError};

/// Default deadline for one store round trip.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(500);

/// A two-tier rate limiter whose counters live in a [`CounterStore`].
///
/// No local lock is held while a store call is in flight.
pub struct DistributedRateLimiter {
    global: RemoteBudget,
    per_client: RemoteBudget,
    limits: TierLimits,
}

impl DistributedRateLimiter {
    /// Create a distributed limiter with the default store timeout.
    pub fn new(store: Arc<dyn CounterStore>, limits: TierLimits) -> Self {
        Self::with_timeout(store, limits, DEFAULT_STORE_TIMEOUT)
    }

    /// Create a distributed limiter whose store calls give up after `timeout`.
    pub fn with_timeout(
        store: Arc<dyn CounterStore>,
        limits: TierLimits,
        timeout: Duration,
    ) -> Self {
        debug!(
            global_limit = limits.global_limit,
            client_limit = limits.client_limit,
            window = ?limits.window,
            timeout = ?timeout,
            "Creating distributed rate limiter"
        );
        Self {
            global: RemoteBudget::new(
                store.clone(),
                RemoteScope::Global,
                limits.global_limit,
                limits.window,
                timeout,
            ),
            per_client: RemoteBudget::new(
                store,
                RemoteScope::PerClient,
                limits.client_limit,
                limits.window,
                timeout,
            ),
            limits,
        }
    }

    /// Prepend `prefix` to both store keys, e.g. to share one Redis between services.
    pub fn with_key_prefix(mut self, prefix: &str) -> Self {
        self.global = self.global.with_key_prefix(prefix);
        self.per_client = self.per_client.with_key_prefix(prefix);
        self
    }

    /// Check both tiers for one request from `client`.
    ///
    /// Both counters are incremented on every request, global first, so a
    /// client keeps paying for requests the global tier refuses.
    pub async fn check(&self, client: &ClientKey) -> Result<RateDecision, StoreError> {
        trace!(client = %client, "Checking distributed rate limit");

        let now = Instant::now();
        let decision = charge_tiers(&self.global, &self.per_client, client, now).await?;

        if let Some(scope) = decision.scope {
            debug!(
                client = %client,
                scope = %scope,
                "Distributed rate limit exceeded"
            );
        }
        Ok(decision)
    }

    /// The limits this limiter enforces.
    pub fn limits(&self) -> TierLimits {
        self.limits
    }
}

#[async_trait]
impl RateLimiterBackend for DistributedRateLimiter {
    async fn check(&self, client: &ClientKey) -> Result<RateDecision, StoreError> {
        DistributedRateLimiter::check(self, client).await
    }

    fn name(&self) -> &'static str {
        "distributed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::decision::Scope;
    use crate::store::MemoryCounterStore;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MINUTE: Duration = Duration::from_secs(60);

    fn limits(global_limit: u64, client_limit: u64) -> TierLimits {
        TierLimits {
            global_limit,
            client_limit,
            window: MINUTE,
        }
    }

    /// Records every expiry the limiter asks for.
    #[derive(Default)]
    struct RecordingStore {
        inner: MemoryCounterStore,
        expiries: Mutex<Vec<(String, Duration)>>,
    }

    #[async_trait]
    impl CounterStore for RecordingStore {
        async fn increment(&self, key: &str) -> Result<u64, StoreError> {
            self.inner.increment(key).await
        }

        async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
            self.expiries.lock().push((key.to_string(), ttl));
            self.inner.expire(key, ttl).await
        }
    }

    /// A store that never answers.
    struct HangingStore;

    #[async_trait]
    impl CounterStore for HangingStore {
        async fn increment(&self, _key: &str) -> Result<u64, StoreError> {
            std::future::pending().await
        }

        async fn expire(&self, _key: &str, _ttl: Duration) -> Result<(), StoreError> {
            std::future::pending().await
        }
    }

    /// A store whose connection is gone.
    struct BrokenStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CounterStore for BrokenStore {
        async fn increment(&self, _key: &str) -> Result<u64, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Connection("connection refused".to_string()))
        }

        async fn expire(&self, _key: &str, _ttl: Duration) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_limit_plus_one_denies_and_ttl_is_set_once() {
        let store = Arc::new(RecordingStore::default());
        let limiter = DistributedRateLimiter::new(store.clone(), limits(100, 3));
        let client = ClientKey::address("10.1.1.1");

        for i in 1..=3 {
            let decision = limiter.check(&client).await.unwrap();
            assert!(decision.allowed, "request {} should pass", i);
        }

        let decision = limiter.check(&client).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.scope, Some(Scope::Client));

        let expiries = store.expiries.lock().clone();
        let client_expiries: Vec<_> = expiries
            .iter()
            .filter(|(key, _)| key == "rate:ip:10.1.1.1")
            .collect();
        assert_eq!(client_expiries.len(), 1);
        assert_eq!(client_expiries[0].1, MINUTE);

        let global_expiries = expiries.iter().filter(|(key, _)| key == "rate:global").count();
        assert_eq!(global_expiries, 1);
        assert_eq!(store.inner.get("rate:ip:10.1.1.1"), Some(4));
    }

    #[tokio::test]
    async fn test_global_dominates() {
        let store = Arc::new(MemoryCounterStore::new());
        let limiter = DistributedRateLimiter::new(store.clone(), limits(2, 100));

        assert!(limiter.check(&ClientKey::address("a")).await.unwrap().allowed);
        assert!(limiter.check(&ClientKey::address("b")).await.unwrap().allowed);

        let decision = limiter.check(&ClientKey::address("c")).await.unwrap();
        assert_eq!(decision.scope, Some(Scope::Global));
        // The refused client's counter is still charged.
        assert_eq!(store.get("rate:ip:c"), Some(1));
        assert_eq!(store.get("rate:global"), Some(3));
    }

    #[tokio::test]
    async fn test_both_exceeded_reports_global() {
        let store = Arc::new(MemoryCounterStore::new());
        let limiter = DistributedRateLimiter::new(store.clone(), limits(1, 1));
        let client = ClientKey::address("a");

        assert!(limiter.check(&client).await.unwrap().allowed);

        let decision = limiter.check(&client).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.scope, Some(Scope::Global));
        assert_eq!(store.get("rate:ip:a"), Some(2));
    }

    #[tokio::test]
    async fn test_per_key_isolation() {
        let store = Arc::new(MemoryCounterStore::new());
        let limiter = DistributedRateLimiter::new(store, limits(100, 1));

        assert!(limiter.check(&ClientKey::address("a")).await.unwrap().allowed);
        assert!(!limiter.check(&ClientKey::address("a")).await.unwrap().allowed);
        assert!(limiter.check(&ClientKey::address("b")).await.unwrap().allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counters_reset_when_keys_expire() {
        let store = Arc::new(MemoryCounterStore::new());
        let limiter = DistributedRateLimiter::new(store, limits(100, 1));
        let client = ClientKey::address("a");

        assert!(limiter.check(&client).await.unwrap().allowed);
        assert!(!limiter.check(&client).await.unwrap().allowed);

        tokio::time::advance(MINUTE).await;
        assert!(limiter.check(&client).await.unwrap().allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_timeout_is_an_error_not_a_refusal() {
        let timeout = Duration::from_millis(50);
        let limiter =
            DistributedRateLimiter::with_timeout(Arc::new(HangingStore), limits(10, 10), timeout);

        let result = limiter.check(&ClientKey::address("a")).await;

        assert_eq!(result, Err(StoreError::Timeout(timeout)));
    }

    #[tokio::test]
    async fn test_store_failure_short_circuits() {
        let store = Arc::new(BrokenStore {
            calls: AtomicUsize::new(0),
        });
        let limiter = DistributedRateLimiter::new(store.clone(), limits(10, 10));

        let result = limiter.check(&ClientKey::address("a")).await;

        assert!(matches!(result, Err(StoreError::Connection(_))));
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_key_prefix_applies_to_both_tiers() {
        let store = Arc::new(MemoryCounterStore::new());
        let limiter =
            DistributedRateLimiter::new(store.clone(), limits(10, 10)).with_key_prefix("edge:");

        limiter.check(&ClientKey::identity("alice")).await.unwrap();

        assert_eq!(store.get("edge:rate:global"), Some(1));
        assert_eq!(store.get("edge:rate:id:alice"), Some(1));
    }
}
