//! Health check endpoint.

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use crate::state::AppState;

/// GET /health: liveness plus counter snapshot.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "nlu": state.dispatcher.nlu_enabled(),
        "limiters": {
            "webhook_keys": state.user_limiter.len(),
            "llm_keys": state.llm_limiter.len(),
        },
        "telemetry": state.dispatcher.telemetry().snapshot(),
    }))
}
