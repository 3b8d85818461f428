//! In-process two-tier rate limiter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::backend::RateLimiterBackend;
use super::budget::{check_tiers, ClientWindowBudget, GlobalWindowBudget};
use super::clock::{Clock, MonotonicClock};
use super::decision::RateDecision;
use super::key::ClientKey;
use super::registry::WindowRegistry;
use crate::store::StoreError;

/// Limits for one two-tier limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    /// Requests allowed per window across all clients
    pub global_limit: u64,
    /// Requests allowed per window for one client
    pub client_limit: u64,
    /// Length of each window
    pub window: Duration,
}

/// A rate limiter that keeps every window in process memory.
///
/// The global window and each per-client window guard their own state; no
/// lock is held across both checks, so under contention the global budget
/// can be overshot by the requests in flight between the two checks.
pub struct LocalRateLimiter {
    global: GlobalWindowBudget,
    per_client: ClientWindowBudget,
    clock: Arc<dyn Clock>,
}

impl LocalRateLimiter {
    /// Create a limiter on the monotonic system clock.
    pub fn new(limits: TierLimits) -> Self {
        Self::with_clock(limits, Arc::new(MonotonicClock))
    }

    /// Create a limiter reading time from `clock`.
    pub fn with_clock(limits: TierLimits, clock: Arc<dyn Clock>) -> Self {
        Self::with_registry(limits, Arc::new(WindowRegistry::new()), clock)
    }

    /// Create a limiter over an existing registry.
    pub fn with_registry(
        limits: TierLimits,
        registry: Arc<WindowRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        debug!(
            global_limit = limits.global_limit,
            client_limit = limits.client_limit,
            window = ?limits.window,
            "Creating local rate limiter"
        );
        Self {
            global: GlobalWindowBudget::new(limits.global_limit, limits.window, now),
            per_client: ClientWindowBudget::new(registry, limits.client_limit, limits.window),
            clock,
        }
    }

    /// Check both tiers for one request from `client`.
    pub async fn check(&self, client: &ClientKey) -> RateDecision {
        let now = self.clock.now();
        trace!(client = %client, "Checking local rate limit");

        match check_tiers(&self.global, &self.per_client, client, now).await {
            Ok(decision) => decision,
            Err(never) => match never {},
        }
    }

    /// The registry of per-client windows.
    pub fn registry(&self) -> &Arc<WindowRegistry> {
        self.per_client.registry()
    }

    /// Requests admitted so far in the current global window.
    pub fn global_count(&self) -> u64 {
        self.global.window().count(self.clock.now())
    }

    /// Requests admitted so far in `client`'s current window, if it has one.
    pub fn client_count(&self, client: &ClientKey) -> Option<u64> {
        let window = self.registry().get(client)?;
        Some(window.count(self.clock.now()))
    }

    /// Drop per-client windows that have rolled over.
    pub fn purge_expired(&self) -> usize {
        self.registry().purge_expired(self.clock.now())
    }
}

#[async_trait]
impl RateLimiterBackend for LocalRateLimiter {
    async fn check(&self, client: &ClientKey) -> Result<RateDecision, StoreError> {
        Ok(LocalRateLimiter::check(self, client).await)
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::decision::Scope;

    const MINUTE: Duration = Duration::from_secs(60);

    fn limits(global_limit: u64, client_limit: u64) -> TierLimits {
        TierLimits {
            global_limit,
            client_limit,
            window: MINUTE,
        }
    }

    fn limiter(global_limit: u64, client_limit: u64) -> (LocalRateLimiter, ManualClock) {
        let clock = ManualClock::new();
        let shared = Arc::new(clock.clone());
        let limiter = LocalRateLimiter::with_clock(limits(global_limit, client_limit), shared);
        (limiter, clock)
    }

    #[tokio::test]
    async fn test_exact_boundary_and_rollover() {
        let (limiter, clock) = limiter(100, 3);
        let client = ClientKey::address("10.0.0.1");

        for i in 1..=3 {
            assert!(limiter.check(&client).await.allowed, "request {} should pass", i);
        }

        let decision = limiter.check(&client).await;
        assert!(!decision.allowed);
        assert_eq!(decision.scope, Some(Scope::Client));

        clock.advance(MINUTE + Duration::from_millis(1));
        assert!(limiter.check(&client).await.allowed);
    }

    #[tokio::test]
    async fn test_per_key_isolation() {
        let (limiter, _clock) = limiter(100, 2);
        let a = ClientKey::address("10.0.0.1");
        let b = ClientKey::address("10.0.0.2");

        limiter.check(&a).await;
        limiter.check(&a).await;
        assert!(!limiter.check(&a).await.allowed);

        assert!(limiter.check(&b).await.allowed);
        assert!(limiter.check(&b).await.allowed);
        assert_eq!(limiter.client_count(&a), Some(2));
        assert_eq!(limiter.client_count(&b), Some(2));
    }

    #[tokio::test]
    async fn test_global_dominates() {
        let (limiter, _clock) = limiter(2, 100);

        assert!(limiter.check(&ClientKey::address("a")).await.allowed);
        assert!(limiter.check(&ClientKey::address("b")).await.allowed);

        let decision = limiter.check(&ClientKey::address("c")).await;
        assert!(!decision.allowed);
        assert_eq!(decision.scope, Some(Scope::Global));
        assert_eq!(limiter.global_count(), 2);
    }

    #[tokio::test]
    async fn test_global_reported_when_both_deny() {
        let (limiter, _clock) = limiter(1, 1);
        let client = ClientKey::address("a");

        assert!(limiter.check(&client).await.allowed);
        let decision = limiter.check(&client).await;
        assert_eq!(decision.scope, Some(Scope::Global));
    }

    #[tokio::test]
    async fn test_retry_hint_counts_down() {
        let (limiter, clock) = limiter(100, 1);
        let client = ClientKey::address("a");

        limiter.check(&client).await;
        clock.advance(Duration::from_secs(20));

        let decision = limiter.check(&client).await;
        assert_eq!(decision.retry_after, Some(Duration::from_secs(40)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_requests_share_one_window() {
        let limiter = Arc::new(LocalRateLimiter::new(limits(1_000, 5)));
        let client = ClientKey::address("198.51.100.4");

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let limiter = limiter.clone();
                let client = client.clone();
                tokio::spawn(async move { limiter.check(&client).await.allowed })
            })
            .collect();

        let results = futures::future::join_all(handles).await;
        let admitted = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();

        assert_eq!(admitted, 5);
        assert_eq!(limiter.registry().len(), 1);
        assert_eq!(limiter.client_count(&client), Some(5));
    }

    #[tokio::test]
    async fn test_purge_expired_windows() {
        let (limiter, clock) = limiter(100, 1);
        limiter.check(&ClientKey::address("a")).await;
        limiter.check(&ClientKey::address("b")).await;

        clock.advance(MINUTE);

        assert_eq!(limiter.purge_expired(), 2);
        assert!(limiter.registry().is_empty());
        assert_eq!(limiter.client_count(&ClientKey::address("a")), None);
    }

    #[tokio::test]
    async fn test_huge_window_does_not_panic() {
        let limiter = LocalRateLimiter::new(TierLimits {
            global_limit: 10,
            client_limit: 1,
            window: Duration::from_secs(i64::MAX as u64),
        });
        let client = ClientKey::address("10.0.0.9");

        assert!(limiter.check(&client).await.allowed);

        let decision = limiter.check(&client).await;
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after, None);
    }
}
