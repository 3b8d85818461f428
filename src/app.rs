//! Builds the admission decision point from configuration.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::admission::AdmissionDecisionPoint;
use crate::config::{RateLimitingConfig, StoreBackend, Strategy};
use crate::error::Result;
use crate::ratelimit::{DistributedRateLimiter, LocalRateLimiter, RateLimiterBackend};
use crate::store::{CounterStore, MemoryCounterStore, RedisCounterStore};

/// A configured decision point plus the background work that keeps it tidy.
pub struct Gatekeeper {
    decision_point: AdmissionDecisionPoint,
    purge_task: Option<JoinHandle<()>>,
}

impl Gatekeeper {
    /// Build the limiter selected by `config`.
    ///
    /// The distributed strategy with a Redis backend connects before
    /// returning, so an unreachable store fails startup.
    pub async fn from_config(config: &RateLimitingConfig) -> Result<Self> {
        let limits = config.tier_limits();
        let purge_interval = config.purge_interval();

        info!(
            strategy = ?config.strategy,
            global_limit = limits.global_limit,
            client_limit = limits.client_limit,
            window = ?limits.window,
            "Configuring rate limiter"
        );

        let (limiter, purge_task): (Arc<dyn RateLimiterBackend>, _) = match config.strategy {
            Strategy::Local => {
                let local = Arc::new(LocalRateLimiter::new(limits));
                let purge_task = purge_interval.map(|every| {
                    let local = local.clone();
                    spawn_purge(every, move || local.purge_expired())
                });
                (local, purge_task)
            }
            Strategy::Distributed => {
                let store_config = &config.store;
                let (store, purge_task): (Arc<dyn CounterStore>, _) = match store_config.backend {
                    StoreBackend::Redis => {
                        let redis = RedisCounterStore::connect(
                            &store_config.url,
                            store_config.atomic_expiry,
                        )
                        .await?;
                        (Arc::new(redis), None)
                    }
                    StoreBackend::Memory => {
                        let memory = Arc::new(MemoryCounterStore::new());
                        let purge_task = purge_interval.map(|every| {
                            let memory = memory.clone();
                            spawn_purge(every, move || memory.purge_expired())
                        });
                        (memory, purge_task)
                    }
                };

                let timeout = store_config.timeout();
                let distributed = DistributedRateLimiter::with_timeout(store, limits, timeout)
                    .with_key_prefix(&store_config.key_prefix);
                (Arc::new(distributed), purge_task)
            }
        };

        Ok(Self {
            decision_point: AdmissionDecisionPoint::new(limiter),
            purge_task,
        })
    }

    /// The decision point to hand to the HTTP layer.
    pub fn decision_point(&self) -> &AdmissionDecisionPoint {
        &self.decision_point
    }

    /// Whether idle counters are being purged in the background.
    pub fn is_purging(&self) -> bool {
        self.purge_task.is_some()
    }
}

impl Drop for Gatekeeper {
    fn drop(&mut self) {
        if let Some(task) = self.purge_task.take() {
            task.abort();
        }
    }
}

/// Run `purge` every `every` until aborted.
fn spawn_purge<F>(every: Duration, purge: F) -> JoinHandle<()>
where
    F: Fn() -> usize + Send + 'static,
{
    info!(interval = ?every, "Starting idle window purge task");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = purge();
            if removed > 0 {
                debug!(removed, "Purged idle rate limit windows");
            }
        }
    })
}
