//! Search and suggestion endpoints

use crate::matcher::is_rejected_title;
use crate::platform::SearchItem;
use crate::AppState;
use axum::extract::State;
use axum::Json;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

/// How many suggestions the UI gets
const SUGGESTION_LIMIT: usize = 5;

/// Titles that are likely the plain audio track score a bonus
static AUDIO_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(official\s*audio|lyrics?\s*video|audio|lyric|official\s*music\s*video)")
        .unwrap()
});

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub query: String,
}

/// POST /api/search - best single result for a song query
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Json<Value> {
    let query = request.query.trim();
    if query.is_empty() {
        return Json(json!({ "error": "No query provided" }));
    }

    let items = match state.platform.search(&format!("{query} song")).await {
        Ok(items) => items,
        Err(e) => return Json(json!({ "error": format!("Search failed: {e}") })),
    };

    match pick_best(&items) {
        Some(best) => Json(json!({
            "id": best.video_id(),
            "title": best.title,
            "url": watch_url(best),
            "duration": best.duration,
            "uploader": best.uploader_name,
            "thumbnail": best.thumbnail,
        })),
        None => Json(json!({ "error": format!("No results found for '{query}'") })),
    }
}

/// POST /api/suggestions - multiple results for typeahead
pub async fn suggestions(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Json<Value> {
    let query = request.query.trim();
    if query.len() < 2 {
        return Json(json!([]));
    }

    let items = match state.platform.search(query).await {
        Ok(items) => items,
        Err(e) => {
            debug!(query = %query, error = %e, "suggestion search failed");
            return Json(json!([]));
        }
    };

    let suggestions: Vec<Value> = items
        .iter()
        .filter(|item| !item.is_short && !item.is_short_form_url())
        .take(SUGGESTION_LIMIT)
        .map(|item| {
            json!({
                "title": item.title,
                "artist": item.uploader_name,
                "duration": item.duration,
                "url": watch_url(item),
                "thumbnail": item.thumbnail,
            })
        })
        .collect();

    Json(json!(suggestions))
}

/// Rank search results and pick the best match.
///
/// Scoring:
///   +3  title contains an "audio" keyword (official audio, lyrics, ...)
///   -10 title contains a reject keyword (reaction, cover, trailer, ...)
///   +1  duration in the typical song range (90 s - 420 s)
///   -5  duration over 15 minutes
///
/// Falls back to the first entry when every result scores poorly.
pub fn pick_best(items: &[SearchItem]) -> Option<&SearchItem> {
    let mut scored: Vec<(i32, &SearchItem)> = items
        .iter()
        .filter(|item| !item.is_short && !item.is_short_form_url())
        .map(|item| {
            let mut score = 0;
            if AUDIO_KEYWORDS.is_match(&item.title) {
                score += 3;
            }
            if is_rejected_title(&item.title) {
                score -= 10;
            }
            if (90..=420).contains(&item.duration) {
                score += 1;
            }
            if item.duration > 900 {
                score -= 5;
            }
            (score, item)
        })
        .collect();

    // Stable sort keeps the platform's relevance order among equal scores.
    scored.sort_by_key(|(score, _)| std::cmp::Reverse(*score));
    scored.first().map(|(_, item)| *item)
}

/// Absolute watch URL for a search item.
fn watch_url(item: &SearchItem) -> String {
    if item.url.starts_with("http") {
        item.url.clone()
    } else {
        format!("https://www.youtube.com{}", item.url)
    }
}
