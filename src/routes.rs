//! Route definitions and router construction.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// The settings panel is served from another origin.
fn build_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Build the complete router with state, CORS and request tracing applied.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(handlers::status))
        .route("/disconnect", post(handlers::disconnect))
        .route("/current-track", get(handlers::current_track))
        .route("/health", get(handlers::health))
        .route("/auth", get(handlers::auth))
        .route("/callback", get(handlers::callback))
        .route("/voice", post(handlers::voice))
        .route("/button", post(handlers::button))
        .layer(build_cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
