//! Rate limiting logic and state management.

mod backend;
pub mod budget;
pub mod clock;
mod decision;
mod distributed;
mod key;
mod local;
mod registry;
mod window;

pub use backend::RateLimiterBackend;
pub use budget::{charge_tiers, check_tiers, Budget};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use decision::{RateDecision, Scope};
pub use distributed::{DistributedRateLimiter, DEFAULT_STORE_TIMEOUT};
pub use key::{ClientKey, LimiterKey};
pub use local::{LocalRateLimiter, TierLimits};
pub use registry::WindowRegistry;
pub use window::{Admission, Window};
