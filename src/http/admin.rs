//! Admin API for the failover state.
//!
//! Served on its own listener and never passes through the admission layer.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::info;

use crate::ratelimit::{FailoverStatus, RateLimiter};

/// Build the admin router.
///
/// - `GET /failover` returns the current [`FailoverStatus`].
/// - `POST /failover/reset` routes decisions back to the primary store and
///   returns the status after the reset.
pub fn admin_router(limiter: Arc<RateLimiter>) -> Router {
    Router::new()
        .route("/failover", get(failover_status))
        .route("/failover/reset", post(reset_failover))
        .with_state(limiter)
}

async fn failover_status(State(limiter): State<Arc<RateLimiter>>) -> Json<FailoverStatus> {
    Json(limiter.failover_status())
}

async fn reset_failover(State(limiter): State<Arc<RateLimiter>>) -> Json<FailoverStatus> {
    let previous = limiter.reset_failover();
    info!(previous = %previous.backend, "Failover reset requested");
    Json(limiter.failover_status())
}
