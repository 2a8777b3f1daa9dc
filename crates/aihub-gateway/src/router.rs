//! Axum router wiring.
//!
//! Ops endpoints are registered explicitly; every other path falls through to
//! the tenant proxy.

use axum::{routing::get, Router};

use crate::{app_state::AppState, ops, transport};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(ops::healthz))
        .route("/readyz", get(ops::readyz))
        .route("/metrics", get(ops::metrics))
        .fallback(transport::http::proxy)
        .with_state(state)
}
