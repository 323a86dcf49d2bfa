//! Primary/secondary store selection.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Which counter store serves decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Primary,
    Secondary,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Primary => f.write_str("primary"),
            Backend::Secondary => f.write_str("secondary"),
        }
    }
}

/// Point-in-time view of the failover state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailoverStatus {
    /// The store currently serving decisions
    pub backend: Backend,
    /// When the engine switched to the secondary store
    pub since: Option<DateTime<Utc>>,
    /// The primary store error that caused the switch
    pub reason: Option<String>,
}

impl Default for FailoverStatus {
    fn default() -> Self {
        Self {
            backend: Backend::Primary,
            since: None,
            reason: None,
        }
    }
}

/// The failover flag shared by every request through one engine.
///
/// Moves from [`Backend::Primary`] to [`Backend::Secondary`] on the first
/// primary failure and stays there until [`reset`](Failover::reset). The
/// lock only guards the flag; callers must not hold it across store calls.
#[derive(Debug, Default)]
pub struct Failover {
    state: Mutex<FailoverStatus>,
}

impl Failover {
    /// Create a failover flag pointing at the primary store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the store that should serve the next decision.
    pub fn current(&self) -> Backend {
        self.state.lock().backend
    }

    /// Switch to the secondary store.
    ///
    /// Returns `true` if this call performed the transition, `false` if the
    /// engine was already on the secondary store.
    pub fn switch_to_secondary(&self, reason: impl Into<String>) -> bool {
        let mut state = self.state.lock();
        if state.backend == Backend::Secondary {
            return false;
        }

        *state = FailoverStatus {
            backend: Backend::Secondary,
            since: Some(Utc::now()),
            reason: Some(reason.into()),
        };
        true
    }

    /// Route decisions back to the primary store.
    ///
    /// Returns the status that was in effect before the reset.
    pub fn reset(&self) -> FailoverStatus {
        std::mem::take(&mut *self.state.lock())
    }

    /// Get a snapshot of the current state.
    pub fn status(&self) -> FailoverStatus {
        self.state.lock().clone()
    }
}
