//! Fixed-window counter used by the in-memory store.

use std::time::Duration;

use tokio::time::Instant;

/// Expiry offset used when `now + ttl` cannot be represented.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// A counter that lives until a fixed expiry.
///
/// The window is fixed at creation; increments never extend it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    /// Requests observed in the current window
    value: u64,
    /// When the window closes
    expires_at: Instant,
}

impl Counter {
    /// Create a counter starting at `value` that expires `ttl` after `now`.
    ///
    /// A `ttl` too large for the clock saturates to a far-future expiry.
    pub fn new(value: u64, ttl: Duration, now: Instant) -> Self {
        let expires_at = now
            .checked_add(ttl)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        Self { value, expires_at }
    }

    /// Get the current value.
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Whether the window has closed at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Increment and return the new value.
    pub fn increment(&mut self) -> u64 {
        self.value = self.value.saturating_add(1);
        self.value
    }
}
