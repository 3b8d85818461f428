//! The result of one admission check.

use std::fmt;
use std::time::Duration;

/// Which tier refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// The service-wide budget
    Global,
    /// The per-client budget
    Client,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => f.write_str("global"),
            Scope::Client => f.write_str("client"),
        }
    }
}

/// Outcome of checking both tiers for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// The tier that refused the request, if any
    pub scope: Option<Scope>,
    /// How long until the refusing tier refills, when known
    pub retry_after: Option<Duration>,
}

impl RateDecision {
    /// A request admitted by both tiers.
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            scope: None,
            retry_after: None,
        }
    }

    /// A request refused by `scope`.
    pub fn denied(scope: Scope, retry_after: Option<Duration>) -> Self {
        Self {
            allowed: false,
            scope: Some(scope),
            retry_after,
        }
    }
}
