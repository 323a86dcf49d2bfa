//! Core rate limiter implementation.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

use super::backend::CounterStore;
use super::failover::{Backend, Failover, FailoverStatus};
use crate::error::{LimiterError, StoreError};

/// How many times a decision restarts when its counter expires mid-flight.
const MAX_DECISION_ATTEMPTS: usize = 3;

/// The fixed-window rate decision engine.
///
/// Decisions run against the primary store until it fails once; from then
/// on every decision runs against the secondary store until
/// [`reset_failover`](RateLimiter::reset_failover) is called.
///
/// This struct is thread-safe and is meant to be shared behind an `Arc`.
pub struct RateLimiter {
    primary: Arc<dyn CounterStore>,
    secondary: Arc<dyn CounterStore>,
    failover: Failover,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("failover", &self.failover)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Create a rate limiter over a primary and a secondary store.
    ///
    /// The same store may be passed for both roles.
    pub fn new(primary: Arc<dyn CounterStore>, secondary: Arc<dyn CounterStore>) -> Self {
        Self {
            primary,
            secondary,
            failover: Failover::new(),
        }
    }

    /// Decide whether one more request for `key` fits in its window.
    ///
    /// Returns `Ok(true)` to admit and `Ok(false)` to reject. An error means
    /// neither store could decide; callers must treat it as a rejection.
    pub async fn allow(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> Result<bool, LimiterError> {
        // The flag lock is released before any store call
        let backend = self.failover.current();

        if backend == Backend::Primary {
            match decide(self.primary.as_ref(), key, limit, window).await {
                Ok(allowed) => {
                    trace!(key = %key, allowed, backend = %backend, "Rate limit decision");
                    return Ok(allowed);
                }
                Err(e) => {
                    if self.failover.switch_to_secondary(e.to_string()) {
                        warn!(
                            key = %key,
                            error = %e,
                            "Primary counter store failed, switching to secondary"
                        );
                    } else {
                        debug!(key = %key, error = %e, "Primary counter store failed after failover");
                    }
                }
            }
        }

        match decide(self.secondary.as_ref(), key, limit, window).await {
            Ok(allowed) => {
                trace!(key = %key, allowed, backend = %Backend::Secondary, "Rate limit decision");
                Ok(allowed)
            }
            Err(e) => {
                error!(key = %key, error = %e, "Secondary counter store failed");
                Err(LimiterError::FailoverExhausted { source: e })
            }
        }
    }

    /// Get the store currently serving decisions.
    pub fn backend(&self) -> Backend {
        self.failover.current()
    }

    /// Get a snapshot of the failover state.
    pub fn failover_status(&self) -> FailoverStatus {
        self.failover.status()
    }

    /// Route decisions back to the primary store.
    ///
    /// Counters accumulated on the secondary store are not carried over.
    pub fn reset_failover(&self) -> FailoverStatus {
        let previous = self.failover.reset();
        if previous.backend == Backend::Secondary {
            warn!(
                since = ?previous.since,
                "Failover reset, routing decisions to the primary store"
            );
        }
        previous
    }
}

/// Run the fixed-window algorithm for one request against one store.
async fn decide(
    store: &dyn CounterStore,
    key: &str,
    limit: u64,
    window: Duration,
) -> Result<bool, StoreError> {
    if limit == 0 {
        return Ok(false);
    }

    for _ in 0..MAX_DECISION_ATTEMPTS {
        let count = match store.get(key).await? {
            None => {
                if store.set_with_expiry(key, 1, window).await? {
                    debug!(key = %key, limit, window = ?window, "Started new rate limit window");
                    return Ok(true);
                }
                // Lost the race to initialize; count against the winner's window
                continue;
            }
            Some(0) => {
                if store.set_with_expiry(key, 1, window).await? {
                    debug!(key = %key, limit, window = ?window, "Started new rate limit window");
                    return Ok(true);
                }
                // A live counter holding zero still counts as the first request
                0
            }
            Some(count) => count,
        };

        if count >= limit {
            debug!(key = %key, count, limit, "Rate limit exceeded");
            return Ok(false);
        }

        match store.increment(key).await? {
            Some(count) => {
                if count > limit {
                    debug!(key = %key, count, limit, "Rate limit exceeded");
                }
                return Ok(count <= limit);
            }
            // The window closed between the read and the increment
            None => continue,
        }
    }

    warn!(key = %key, "Rate limit window kept changing during decision, rejecting");
    Ok(false)
}
