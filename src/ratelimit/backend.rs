//! Rate limiter trait for abstracting local and distributed implementations.

use async_trait::async_trait;

use super::decision::RateDecision;
use super::key::ClientKey;
use crate::store::StoreError;

/// Trait for rate limiter implementations.
///
/// This trait abstracts over both the `LocalRateLimiter` and the
/// `DistributedRateLimiter` so the admission point can work with either.
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Check both tiers for one request from `client`.
    ///
    /// Refusals are decisions, not errors. Only a failure of the shared
    /// counter store is reported as `Err`.
    async fn check(&self, client: &ClientKey) -> Result<RateDecision, StoreError>;

    /// Short strategy name for logs.
    fn name(&self) -> &'static str;
}
