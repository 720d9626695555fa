//! On-demand download, prefetch, and progress endpoints

use crate::api::search::pick_best;
use crate::platform::extract_video_id;
use crate::tasks;
use crate::AppState;
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    /// Accepted for UI compatibility; the engine stores the native codec
    /// and does not transcode, so these are informational only.
    #[serde(default)]
    pub quality: Option<u32>,
    #[serde(default)]
    pub codec: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PrefetchRequest {
    #[serde(default)]
    pub url: String,
}

/// POST /api/download - start a single-song download, returns a task id
pub async fn start_download(
    State(state): State<AppState>,
    Json(request): Json<DownloadRequest>,
) -> Json<Value> {
    let url = request.url.trim();
    if url.is_empty() {
        return Json(json!({ "error": "No URL provided" }));
    }

    let task_id = tasks::spawn_download(
        Arc::clone(&state.tasks),
        state.http.clone(),
        Arc::clone(&state.resolver),
        state.music_dir.clone(),
        url.to_string(),
        request.title,
    );

    Json(json!({ "task_id": task_id, "status": "started" }))
}

/// POST /api/search-download - search for a song and download the best hit
pub async fn search_download(
    State(state): State<AppState>,
    Json(request): Json<crate::api::search::QueryRequest>,
) -> Json<Value> {
    let query = request.query.trim();
    if query.is_empty() {
        return Json(json!({ "error": "No query provided" }));
    }

    let items = match state.platform.search(&format!("{query} song")).await {
        Ok(items) => items,
        Err(e) => return Json(json!({ "error": format!("Search failed: {e}") })),
    };
    let Some(best) = pick_best(&items) else {
        return Json(json!({ "error": format!("Not found: no results for '{query}'") }));
    };

    let task_id = tasks::spawn_download(
        Arc::clone(&state.tasks),
        state.http.clone(),
        Arc::clone(&state.resolver),
        state.music_dir.clone(),
        best.url.clone(),
        Some(best.title.clone()),
    );

    Json(json!({ "task_id": task_id, "status": "started" }))
}

/// GET /api/progress/{task_id} - poll download progress
pub async fn progress(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Json<Value> {
    let Some(task) = state.tasks.get(&task_id) else {
        return Json(json!({ "error": "Unknown task" }));
    };

    let mut response = json!({
        "status": task.status,
        "percent": task.percent,
    });

    if let Some(message) = &task.message {
        response["message"] = json!(message);
    }
    if task.status == tasks::STATUS_DONE {
        if let Some(result) = &task.result {
            response["result"] = json!(result);
        }
    } else if task.status == tasks::STATUS_ERROR {
        response["error"] = json!(task
            .error
            .clone()
            .unwrap_or_else(|| "Download failed".to_string()));
    }

    Json(response)
}

/// POST /api/prefetch - warm the stream cache for a URL
pub async fn prefetch(
    State(state): State<AppState>,
    Json(request): Json<PrefetchRequest>,
) -> Json<Value> {
    let Some(video_id) = extract_video_id(request.url.trim()) else {
        return Json(json!({ "prefetching": false, "cached": false }));
    };

    let cached = state.resolver.is_cached(&video_id);
    if !cached {
        state.resolver.prefetch(&video_id);
    }

    Json(json!({ "prefetching": !cached, "cached": cached }))
}
