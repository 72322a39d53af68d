//! Application routes.
//!
//! - `GET /healthz`, `GET /readyz`: health checks, never authenticated
//! - everything else: WebDAV, dispatched by method name behind Basic auth
//!
//! CORS headers and request tracing wrap both.

use crate::{
    handlers::{
        dav_handlers::dispatch,
        health_handlers::{healthz, readyz},
    },
    routes::{auth::require_basic_auth, cors::apply_cors_headers},
    state::AppState,
};
use axum::{Router, middleware, routing::get};
use tower_http::trace::TraceLayer;

/// Build the full application router around `state`.
pub fn routes(state: AppState) -> Router {
    let dav = Router::new()
        .fallback(dispatch)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_basic_auth,
        ))
        .with_state(state.clone());

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .fallback_service(dav)
        .with_state(state)
        .layer(middleware::from_fn(apply_cors_headers))
        .layer(TraceLayer::new_for_http())
}
