//! Route definitions and router construction.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Build the full application router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(handlers::health::healthz))
        .route("/deploy", post(handlers::deploy::deploy))
        .route("/deploys", get(handlers::deploy::list))
        // Single-agent mode.
        .route("/session", get(handlers::session_ws::default_session))
        // Multi-agent mode, routed through the deploy registry.
        .route("/:slug/session", get(handlers::session_ws::slug_session))
        .route("/:slug/client.js", get(handlers::bundles::client_js))
        .route("/:slug/", get(handlers::bundles::shell))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
