//! API route modules.

pub mod health;
pub mod session;

use axum::{Router, middleware, routing::get};
use sessionware_core::session_middleware;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the main router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    // Public routes (no session)
    let public_routes = Router::new().route("/health", get(health::health_check));

    // Session-backed routes
    let session_routes = session::router().layer(middleware::from_fn_with_state(
        Arc::clone(&state.session_options),
        session_middleware,
    ));

    Router::new()
        .merge(public_routes)
        .nest("/api", session_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
