//! Batch import endpoints and the action gateway

use crate::db;
use crate::models::ImportResult;
use crate::orchestrator::{ActionResponse, TrackAction};
use crate::AppState;
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub track_id: Uuid,
    pub action: TrackAction,
    #[serde(default)]
    pub video_id: Option<String>,
}

/// POST /api/import - submit a playlist/album URL as a batch
pub async fn import(
    State(state): State<AppState>,
    Json(request): Json<ImportRequest>,
) -> Json<ImportResult> {
    let url = request.url.trim();
    if url.is_empty() {
        return Json(ImportResult::failed(None, "No URL provided"));
    }

    Json(state.manager.submit_batch(url).await)
}

/// GET /api/import/list - all batches, newest first
pub async fn import_list(State(state): State<AppState>) -> Json<Value> {
    match db::batches::list_batches(&state.db).await {
        Ok(batches) => Json(json!(batches)),
        Err(e) => Json(json!({ "error": format!("failed to list batches: {e}") })),
    }
}

/// GET /api/import/status/{batch_id} - one batch with its tracks
pub async fn import_status(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> Json<Value> {
    match db::batches::get_batch_with_tracks(&state.db, batch_id).await {
        Ok(Some((batch, tracks))) => Json(json!({ "batch": batch, "tracks": tracks })),
        Ok(None) => Json(json!({ "error": "Batch not found" })),
        Err(e) => Json(json!({ "error": format!("failed to load batch: {e}") })),
    }
}

/// POST /api/import/action - operator decision on a low-confidence match
pub async fn import_action(
    State(state): State<AppState>,
    Json(request): Json<ActionRequest>,
) -> Json<ActionResponse> {
    Json(
        state
            .manager
            .action(request.track_id, request.action, request.video_id)
            .await,
    )
}
