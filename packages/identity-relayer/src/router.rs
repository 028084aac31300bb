//! HTTP router setup.

use crate::handlers;
use crate::middleware::inject_request_id;
use crate::state::AppState;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create(state: Arc<AppState>) -> Router {
    let request_timeout = Duration::from_secs(state.config.request_timeout_secs);
    let wormhole_timeout = Duration::from_secs(state.config.wormhole_timeout_secs);

    let api = Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/relay", post(handlers::relay))
        .route("/wormhole_relay/{id}", get(handlers::wormhole_status))
        .route("/tracks/{id}/listen", post(handlers::track_listen))
        .route("/tracks/listen/solana/status", get(handlers::listen_status))
        .layer(timeout(request_timeout));

    // Permit and transfer are mined before this returns.
    let wormhole = Router::new()
        .route("/wormhole_relay", post(handlers::wormhole_relay))
        .layer(timeout(wormhole_timeout));

    api.merge(wormhole)
        .layer(middleware::from_fn(inject_request_id))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Requests still running after `limit` get 408.
fn timeout(limit: Duration) -> TimeoutLayer {
    TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, limit)
}
