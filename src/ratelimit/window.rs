//! Fixed-window counter.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// The verdict of a single window check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Whether the request fits in the budget
    pub allowed: bool,
    /// Time until the budget refills, when known and the request was refused
    pub retry_after: Option<Duration>,
}

impl Admission {
    /// An admitted request.
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after: None,
        }
    }

    /// A refused request with an optional retry hint.
    pub fn denied(retry_after: Option<Duration>) -> Self {
        Self {
            allowed: false,
            retry_after,
        }
    }
}

#[derive(Debug)]
struct WindowState {
    start: Instant,
    count: u64,
}

/// A single fixed-size counting interval.
///
/// Rollover and check-and-increment run under one lock, so two racing
/// callers can never both observe `count < limit` for the last slot.
#[derive(Debug)]
pub struct Window {
    limit: u64,
    duration: Duration,
    state: Mutex<WindowState>,
}

impl Window {
    /// Create a window that opens at `start`.
    pub fn new(limit: u64, duration: Duration, start: Instant) -> Self {
        Self {
            limit,
            duration,
            state: Mutex::new(WindowState { start, count: 0 }),
        }
    }

    /// Try to take one slot from the budget.
    ///
    /// Returns `true` if the request is within the limit. A refused request
    /// leaves the count unchanged.
    pub fn admit(&self, now: Instant) -> bool {
        self.admit_with_hint(now).allowed
    }

    /// Like [`Window::admit`], also reporting how long until the window
    /// rolls over when the request is refused.
    pub fn admit_with_hint(&self, now: Instant) -> Admission {
        let mut state = self.state.lock();

        if self.has_elapsed(state.start, now) {
            state.start = now;
            state.count = 0;
        }

        if state.count < self.limit {
            state.count += 1;
            return Admission::allowed();
        }

        let retry_after = state
            .start
            .checked_add(self.duration)
            .map(|ends_at| ends_at.saturating_duration_since(now));
        Admission::denied(retry_after)
    }

    /// Requests admitted in the window that is current at `now`.
    pub fn count(&self, now: Instant) -> u64 {
        let state = self.state.lock();
        if self.has_elapsed(state.start, now) {
            0
        } else {
            state.count
        }
    }

    /// Slots left in the window that is current at `now`.
    pub fn remaining(&self, now: Instant) -> u64 {
        self.limit.saturating_sub(self.count(now))
    }

    /// Whether the window opened at its recorded start has ended by `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        let state = self.state.lock();
        self.has_elapsed(state.start, now)
    }

    /// Get the limit for this window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Get the length of this window.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// A window whose end is past the clock's range never elapses.
    fn has_elapsed(&self, start: Instant, now: Instant) -> bool {
        start
            .checked_add(self.duration)
            .is_some_and(|ends_at| now >= ends_at)
    }
}
