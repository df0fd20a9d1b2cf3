//! HTTP routes and router builder.

pub mod callback;
pub mod health;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/callback", post(callback::callback))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
