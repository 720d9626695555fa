//! Library listing, streaming, and deletion

use crate::AppState;
use axum::body::Body;
use axum::extract::{Path as UrlPath, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use tokio_util::io::ReaderStream;
use tunevault_common::fingerprint::human_size;

/// Codec extensions the library knows about
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "opus", "ogg"];

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    #[serde(default)]
    pub filename: String,
}

/// GET /api/library - downloaded files, newest first
pub async fn library(State(state): State<AppState>) -> Json<Value> {
    let mut songs: Vec<(std::time::SystemTime, Value)> = Vec::new();

    let Ok(mut entries) = tokio::fs::read_dir(&state.music_dir).await else {
        return Json(json!([]));
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !AUDIO_EXTENSIONS.contains(&ext) {
            continue;
        }
        let Ok(meta) = entry.metadata().await else {
            continue;
        };

        let size = meta.len();
        let modified = meta.modified().unwrap_or(std::time::UNIX_EPOCH);
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let title = path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        songs.push((
            modified,
            json!({
                "filename": filename,
                "title": title,
                "size": size,
                "size_human": human_size(size),
                "duration": estimate_duration_secs(size, ext),
                "codec": ext,
            }),
        ));
    }

    songs.sort_by(|a, b| b.0.cmp(&a.0));
    Json(json!(songs.into_iter().map(|(_, v)| v).collect::<Vec<_>>()))
}

/// GET /api/music/{filename} - stream an audio file for playback
pub async fn stream_music(
    State(state): State<AppState>,
    UrlPath(filename): UrlPath<String>,
) -> Response {
    if !is_safe_library_name(&filename) {
        return Json(json!({ "error": "File not found" })).into_response();
    }

    let path = state.music_dir.join(&filename);
    let Ok(file) = tokio::fs::File::open(&path).await else {
        return Json(json!({ "error": "File not found" })).into_response();
    };

    let mime = mime_for_name(&filename);
    let stream = ReaderStream::new(file);
    ([(header::CONTENT_TYPE, mime)], Body::from_stream(stream)).into_response()
}

/// POST /api/delete - remove one file from the library
pub async fn delete(
    State(state): State<AppState>,
    Json(request): Json<DeleteRequest>,
) -> Json<Value> {
    if !is_safe_library_name(&request.filename) {
        return Json(json!({ "error": "File not found" }));
    }

    let path = state.music_dir.join(&request.filename);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => Json(json!({ "success": true })),
        Err(_) => Json(json!({ "error": "File not found" })),
    }
}

/// A library name is a bare audio file name: no separators, no traversal,
/// known codec extension.
fn is_safe_library_name(filename: &str) -> bool {
    if filename.is_empty()
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains("..")
    {
        return false;
    }
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| AUDIO_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

fn mime_for_name(filename: &str) -> &'static str {
    match Path::new(filename).extension().and_then(|e| e.to_str()) {
        Some("mp3") => "audio/mpeg",
        Some("opus") => "audio/webm",
        Some("ogg") => "audio/ogg",
        _ => "application/octet-stream",
    }
}

/// Rough duration from file size and a typical bitrate for the codec.
/// Good enough for the library view; the player shows the real value.
fn estimate_duration_secs(size: u64, ext: &str) -> u64 {
    let bitrate_bps: u64 = match ext {
        "mp3" => 320_000,
        _ => 128_000,
    };
    size * 8 / bitrate_bps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_traversal_and_foreign_extensions() {
        assert!(is_safe_library_name("Song.mp3"));
        assert!(is_safe_library_name("My Song - live.opus"));
        assert!(!is_safe_library_name("../etc/passwd"));
        assert!(!is_safe_library_name("dir/Song.mp3"));
        assert!(!is_safe_library_name("Song.exe"));
        assert!(!is_safe_library_name("Song"));
        assert!(!is_safe_library_name(""));
    }

    #[test]
    fn mime_types() {
        assert_eq!(mime_for_name("a.mp3"), "audio/mpeg");
        assert_eq!(mime_for_name("a.opus"), "audio/webm");
        assert_eq!(mime_for_name("a.ogg"), "audio/ogg");
    }

    #[test]
    fn duration_estimate() {
        // 10 MB at 320 kbps is about 250 seconds
        assert_eq!(estimate_duration_secs(10_000_000, "mp3"), 250);
    }
}
