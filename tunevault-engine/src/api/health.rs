//! Health check endpoint

use crate::AppState;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "tunevault-engine",
        "version": env!("CARGO_PKG_VERSION"),
        "active_workers": state.manager.active_workers(),
        "max_concurrent": state.manager.current_max_concurrent(),
    }))
}
