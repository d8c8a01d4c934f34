//! Axum router configuration

use axum::{
    http::{header, Method},
    routing::get,
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::metrics::metrics_handler;
use crate::state::AppState;

use super::handlers::{active_sessions, health_check, stream_handler, version_check};

/// Create the Axum router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors_enabled = state.config.cors_enabled;

    let router = Router::new()
        // Health and version endpoints
        .route("/health", get(health_check))
        .route("/version", get(version_check))
        .route("/metrics", get(metrics_handler))
        // Debug endpoints
        .route("/debug/sessions", get(active_sessions))
        // Transcoded stream
        .route("/stream", get(stream_handler))
        // Middleware
        .layer(TraceLayer::new_for_http());

    let router = if cors_enabled {
        // Players on another origin fetch the stream directly, so
        // pre-flight requests have to be answered.
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::OPTIONS, Method::HEAD])
            .allow_headers([header::ACCEPT, header::RANGE, header::ORIGIN])
            .max_age(Duration::from_secs(3600));
        router.layer(cors)
    } else {
        router
    };

    router.with_state(state)
}
