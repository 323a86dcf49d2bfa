//! Counter store trait for abstracting local and distributed storage.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

/// Storage for fixed-window counters.
///
/// This trait abstracts over the process-local [`MemoryStore`] and the
/// Redis-backed [`RedisStore`] so the [`RateLimiter`] can fail over from
/// one to the other without knowing which is which.
///
/// Every operation is a cancellation point: dropping the returned future
/// abandons the call. Side effects that already reached the store (a
/// completed increment) are not rolled back.
///
/// [`MemoryStore`]: super::MemoryStore
/// [`RedisStore`]: super::RedisStore
/// [`RateLimiter`]: super::RateLimiter
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read the live counter for `key`.
    ///
    /// Returns `Ok(None)` when no counter exists or it has expired.
    async fn get(&self, key: &str) -> Result<Option<u64>, StoreError>;

    /// Create the counter for `key` with `value`, expiring after `ttl`.
    ///
    /// A live counter is never overwritten. Returns `true` when this call
    /// created the counter and `false` when another caller got there first.
    async fn set_with_expiry(&self, key: &str, value: u64, ttl: Duration)
        -> Result<bool, StoreError>;

    /// Atomically increment the live counter for `key`.
    ///
    /// Returns the value after the increment, or `Ok(None)` if the counter
    /// no longer exists. A missing counter is never created here, so no
    /// counter can exist without an expiry.
    async fn increment(&self, key: &str) -> Result<Option<u64>, StoreError>;
}
