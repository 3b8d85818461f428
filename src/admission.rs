//! The admission decision point.
//!
//! This is the only piece the request pipeline talks to. It asks the
//! configured limiter for a decision and translates the answer into the
//! caller-visible taxonomy: allowed, rejected by the global or client tier,
//! or failed because the counter store is unavailable.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, trace};

use crate::ratelimit::{ClientKey, RateDecision, RateLimiterBackend, Scope};
use crate::store::StoreError;

/// Why a request was not admitted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// A tier's budget is exhausted. Expected, user-facing.
    #[error("Rate limit exceeded ({scope} budget)")]
    RateLimited {
        /// The tier that refused the request
        scope: Scope,
        /// Time to wait before retrying, when known
        retry_after: Option<Duration>,
    },

    /// The shared counter store failed. Requests are refused, not waved through.
    #[error("Rate limit store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl AdmissionError {
    /// Get the retry-after duration if available.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            Self::StoreUnavailable(_) => None,
        }
    }
}

/// The caller-visible result of one admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Both tiers admitted the request.
    Allowed,
    /// The service-wide budget is exhausted.
    RejectedGlobal {
        /// Time to wait before retrying, when known
        retry_after: Option<Duration>,
    },
    /// The client's own budget is exhausted.
    RejectedClient {
        /// Time to wait before retrying, when known
        retry_after: Option<Duration>,
    },
    /// The counter store could not give an answer.
    StoreError(StoreError),
}

impl Outcome {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Outcome::Allowed)
    }

    /// Convert into `Ok(())` for admitted requests and an error otherwise.
    pub fn into_result(self) -> Result<(), AdmissionError> {
        match self {
            Outcome::Allowed => Ok(()),
            Outcome::RejectedGlobal { retry_after } => Err(AdmissionError::RateLimited {
                scope: Scope::Global,
                retry_after,
            }),
            Outcome::RejectedClient { retry_after } => Err(AdmissionError::RateLimited {
                scope: Scope::Client,
                retry_after,
            }),
            Outcome::StoreError(err) => Err(AdmissionError::StoreUnavailable(err)),
        }
    }
}

impl From<Result<RateDecision, AdmissionError>> for Outcome {
    fn from(result: Result<RateDecision, AdmissionError>) -> Self {
        match result {
            Ok(decision) => match decision.scope {
                _ if decision.allowed => Outcome::Allowed,
                Some(Scope::Client) => Outcome::RejectedClient {
                    retry_after: decision.retry_after,
                },
                Some(Scope::Global) | None => Outcome::RejectedGlobal {
                    retry_after: decision.retry_after,
                },
            },
            Err(AdmissionError::RateLimited { scope: Scope::Client, retry_after }) => {
                Outcome::RejectedClient { retry_after }
            }
            Err(AdmissionError::RateLimited { scope: Scope::Global, retry_after }) => {
                Outcome::RejectedGlobal { retry_after }
            }
            Err(AdmissionError::StoreUnavailable(err)) => Outcome::StoreError(err),
        }
    }
}

/// Decides whether an inbound request may proceed.
///
/// Cheap to clone and safe to share between any number of in-flight
/// requests; all mutable state lives in the limiter behind it.
#[derive(Clone)]
pub struct AdmissionDecisionPoint {
    limiter: Arc<dyn RateLimiterBackend>,
}

impl AdmissionDecisionPoint {
    /// Create a decision point over `limiter`.
    pub fn new(limiter: Arc<dyn RateLimiterBackend>) -> Self {
        Self { limiter }
    }

    /// Ask the limiter about one request from `client`.
    ///
    /// Tier refusals come back as `Ok` decisions with `allowed == false`;
    /// only a store failure is an `Err`.
    pub async fn evaluate(&self, client: &ClientKey) -> Result<RateDecision, AdmissionError> {
        match self.limiter.check(client).await {
            Ok(decision) => {
                if decision.allowed {
                    trace!(client = %client, strategy = self.limiter.name(), "Request admitted");
                } else {
                    debug!(
                        client = %client,
                        strategy = self.limiter.name(),
                        scope = ?decision.scope,
                        retry_after = ?decision.retry_after,
                        "Request rejected by rate limit"
                    );
                }
                Ok(decision)
            }
            Err(err) => {
                error!(
                    client = %client,
                    strategy = self.limiter.name(),
                    error = %err,
                    "Rate limit store unavailable, rejecting request"
                );
                Err(AdmissionError::StoreUnavailable(err))
            }
        }
    }

    /// Like [`AdmissionDecisionPoint::evaluate`], folded into an [`Outcome`].
    pub async fn outcome(&self, client: &ClientKey) -> Outcome {
        Outcome::from(self.evaluate(client).await)
    }

    /// `Ok(())` if the request may proceed, the reason it may not otherwise.
    pub async fn admit(&self, client: &ClientKey) -> Result<(), AdmissionError> {
        self.outcome(client).await.into_result()
    }

    /// Name of the configured strategy.
    pub fn strategy(&self) -> &'static str {
        self.limiter.name()
    }
}

impl std::fmt::Debug for AdmissionDecisionPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionDecisionPoint")
            .field("strategy", &self.limiter.name())
            .finish()
    }
}
