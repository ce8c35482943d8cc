//! API module
//!
//! HTTP API endpoints and middleware.

pub mod middleware;
pub mod routes;

use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::engine::LedgerEngine;

pub use routes::create_router;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<LedgerEngine>,
}

impl AppState {
    pub fn new(engine: Arc<LedgerEngine>) -> Self {
        Self { engine }
    }
}

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // Axum layers run last-added first: context -> logging -> handler
    let api_routes = create_router()
        .layer(axum::middleware::from_fn(middleware::logging_middleware))
        .layer(axum::middleware::from_fn(middleware::context_middleware));

    Router::new()
        // Health check (no context needed)
        .route("/health", axum::routing::get(health_check))
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
