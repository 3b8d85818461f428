//! Lazily populated map of per-client windows.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, trace};

use super::key::ClientKey;
use super::window::Window;

/// Owns one [`Window`] per client key.
///
/// The hot path is a lookup of an existing key, which only takes the read
/// lock. Inserts take the write lock and re-check presence, so concurrent
/// first requests for the same key end up sharing one window.
#[derive(Debug, Default)]
pub struct WindowRegistry {
    windows: RwLock<HashMap<ClientKey, Arc<Window>>>,
}

impl WindowRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the window for `key`, creating it with the given budget if absent.
    ///
    /// The window of a newly created entry opens at `now`.
    pub fn get_or_create(
        &self,
        key: &ClientKey,
        default_limit: u64,
        default_duration: Duration,
        now: Instant,
    ) -> Arc<Window> {
        if let Some(window) = self.windows.read().get(key) {
            return Arc::clone(window);
        }

        let mut windows = self.windows.write();
        // Another caller may have inserted between the read and the write lock.
        if let Some(window) = windows.get(key) {
            let window = Arc::clone(window);
            drop(windows);
            trace!(key = %key, "Window created concurrently");
            return window;
        }

        let window = Arc::new(Window::new(default_limit, default_duration, now));
        windows.insert(key.clone(), Arc::clone(&window));
        drop(windows);

        debug!(
            key = %key,
            limit = default_limit,
            window = ?default_duration,
            "Created per-client window"
        );
        window
    }

    /// Look up the window for `key` without creating one.
    pub fn get(&self, key: &ClientKey) -> Option<Arc<Window>> {
        self.windows.read().get(key).cloned()
    }

    /// Drop every window whose interval has ended by `now`.
    ///
    /// Returns the number of entries removed. A caller holding a handle to a
    /// purged window keeps counting against a detached copy until its next
    /// lookup, so a purge may overshoot a client's budget by the requests in
    /// flight at that moment. Until those callers finish, one key can have
    /// two live windows.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let mut windows = self.windows.write();
        let before = windows.len();
        windows.retain(|_, window| !window.is_expired(now));
        before - windows.len()
    }

    /// Get the number of tracked clients.
    pub fn len(&self) -> usize {
        self.windows.read().len()
    }

    /// Whether no client has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.windows.read().is_empty()
    }

    /// Clear all windows.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.windows.write().clear();
    }
}
