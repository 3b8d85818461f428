//! Budgets: one tier of the two-tier limiter.
//!
//! A budget answers "may one more request from this client go through?".
//! The in-memory budgets count in [`Window`]s; the remote budget counts in
//! a shared [`CounterStore`]. The local limiter composes its tiers with
//! [`check_tiers`], the distributed one with [`charge_tiers`].

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::trace;

use super::decision::{RateDecision, Scope};
use super::key::{ClientKey, LimiterKey};
use super::registry::WindowRegistry;
use super::window::{Admission, Window};
use crate::store::{CounterStore, StoreError};

/// One tier of admission control.
#[async_trait]
pub trait Budget: Send + Sync {
    /// Failure type of the backing state.
    type Error: Send;

    /// Try to take one slot for `client` at `now`.
    async fn admit(&self, client: &ClientKey, now: Instant) -> Result<Admission, Self::Error>;
}

/// Check the global tier, then the per-client tier.
///
/// The per-client budget is not consumed when the global tier refuses, and a
/// refusal by both is reported as global.
pub async fn check_tiers<G, C>(
    global: &G,
    per_client: &C,
    client: &ClientKey,
    now: Instant,
) -> Result<RateDecision, G::Error>
where
    G: Budget + ?Sized,
    C: Budget<Error = G::Error> + ?Sized,
{
    let verdict = global.admit(client, now).await?;
    if !verdict.allowed {
        return Ok(RateDecision::denied(Scope::Global, verdict.retry_after));
    }

    let verdict = per_client.admit(client, now).await?;
    if !verdict.allowed {
        return Ok(RateDecision::denied(Scope::Client, verdict.retry_after));
    }

    Ok(RateDecision::allowed())
}

/// Charge both tiers, then report.
///
/// Unlike [`check_tiers`], the per-client budget is consumed even when the
/// global tier refuses. Only an error stops the second charge. A refusal by
/// both is reported as global.
pub async fn charge_tiers<G, C>(
    global: &G,
    per_client: &C,
    client: &ClientKey,
    now: Instant,
) -> Result<RateDecision, G::Error>
where
    G: Budget + ?Sized,
    C: Budget<Error = G::Error> + ?Sized,
{
    let global_verdict = global.admit(client, now).await?;
    let client_verdict = per_client.admit(client, now).await?;

    if !global_verdict.allowed {
        return Ok(RateDecision::denied(Scope::Global, global_verdict.retry_after));
    }
    if !client_verdict.allowed {
        return Ok(RateDecision::denied(Scope::Client, client_verdict.retry_after));
    }
    Ok(RateDecision::allowed())
}

/// A single in-memory window shared by every client.
#[derive(Debug)]
pub struct GlobalWindowBudget {
    window: Window,
}

impl GlobalWindowBudget {
    /// Create a global budget whose first window opens at `start`.
    pub fn new(limit: u64, duration: Duration, start: Instant) -> Self {
        Self {
            window: Window::new(limit, duration, start),
        }
    }

    /// The underlying window.
    pub fn window(&self) -> &Window {
        &self.window
    }
}

#[async_trait]
impl Budget for GlobalWindowBudget {
    type Error = Infallible;

    async fn admit(&self, _client: &ClientKey, now: Instant) -> Result<Admission, Infallible> {
        Ok(self.window.admit_with_hint(now))
    }
}

/// One in-memory window per client, created on first sight.
#[derive(Debug)]
pub struct ClientWindowBudget {
    registry: Arc<WindowRegistry>,
    limit: u64,
    duration: Duration,
}

impl ClientWindowBudget {
    /// Create a per-client budget over `registry`.
    pub fn new(registry: Arc<WindowRegistry>, limit: u64, duration: Duration) -> Self {
        Self {
            registry,
            limit,
            duration,
        }
    }

    /// The registry holding the per-client windows.
    pub fn registry(&self) -> &Arc<WindowRegistry> {
        &self.registry
    }
}

#[async_trait]
impl Budget for ClientWindowBudget {
    type Error = Infallible;

    async fn admit(&self, client: &ClientKey, now: Instant) -> Result<Admission, Infallible> {
        let window = self
            .registry
            .get_or_create(client, self.limit, self.duration, now);
        Ok(window.admit_with_hint(now))
    }
}

/// Which store key a [`RemoteBudget`] counts against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteScope {
    /// `rate:global`
    Global,
    /// `rate:ip:<address>` or `rate:id:<identity>`
    PerClient,
}

/// A budget counted in a shared store.
///
/// Every store call is bounded by `timeout`; an elapsed deadline is a
/// [`StoreError::Timeout`], never a refusal.
pub struct RemoteBudget {
    store: Arc<dyn CounterStore>,
    scope: RemoteScope,
    limit: u64,
    window: Duration,
    timeout: Duration,
    key_prefix: String,
}

impl RemoteBudget {
    /// Create a remote budget.
    pub fn new(
        store: Arc<dyn CounterStore>,
        scope: RemoteScope,
        limit: u64,
        window: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            scope,
            limit,
            window,
            timeout,
            key_prefix: String::new(),
        }
    }

    /// Prepend `prefix` to every store key.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// The store key this budget counts against for `client`.
    pub fn store_key(&self, client: &ClientKey) -> String {
        let key = match self.scope {
            RemoteScope::Global => LimiterKey::Global,
            RemoteScope::PerClient => LimiterKey::Client(client.clone()),
        };
        format!("{}{}", self.key_prefix, key.store_key())
    }
}

#[async_trait]
impl Budget for RemoteBudget {
    type Error = StoreError;

    async fn admit(&self, client: &ClientKey, _now: Instant) -> Result<Admission, StoreError> {
        let key = self.store_key(client);

        let count = tokio::time::timeout(
            self.timeout,
            self.store.increment_and_get_count(&key, self.window),
        )
        .await
        .map_err(|_| StoreError::Timeout(self.timeout))??;

        trace!(key = %key, count, limit = self.limit, "Incremented shared counter");

        if count > self.limit {
            Ok(Admission::denied(None))
        } else {
            Ok(Admission::allowed())
        }
    }
}
