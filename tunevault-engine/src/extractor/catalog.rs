//! Variant B: authenticated catalog extractor
//!
//! Talks to the catalog's REST API under a client-credentials bearer token,
//! following `next` links until the cap. When the API path yields nothing
//! (bad credentials, region-locked list, unknown id) it degrades to
//! scraping the public page: linked-data blocks first, then track-row
//! anchors, and as a last resort a single candidate built from the page
//! title and description.

use super::scrape::{candidate_from_meta, decode_entities, og_meta};
use super::{SourceExtractor, TrackCandidate, MAX_TRACKS_PER_BATCH};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

/// Tokens within this margin of expiry are refreshed eagerly
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// A playlist or album reference parsed from user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogRef {
    Playlist(String),
    Album(String),
}

impl CatalogRef {
    pub fn id(&self) -> &str {
        match self {
            CatalogRef::Playlist(id) | CatalogRef::Album(id) => id,
        }
    }
}

/// Accepts web URLs (`https://host/playlist/<id>`), with or without query
/// strings, and URI-style identifiers (`service:album:<id>`).
pub fn parse_catalog_ref(input: &str) -> Option<CatalogRef> {
    if !input.contains("://") {
        let parts: Vec<&str> = input.split(':').collect();
        if parts.len() == 3 && !parts[2].is_empty() {
            return match parts[1] {
                "playlist" => Some(CatalogRef::Playlist(parts[2].to_string())),
                "album" => Some(CatalogRef::Album(parts[2].to_string())),
                _ => None,
            };
        }
        return None;
    }

    let parsed = Url::parse(input).ok()?;
    let segments: Vec<&str> = parsed.path_segments()?.collect();
    for pair in segments.windows(2) {
        match pair[0] {
            "playlist" if !pair[1].is_empty() => {
                return Some(CatalogRef::Playlist(pair[1].to_string()))
            }
            "album" if !pair[1].is_empty() => {
                return Some(CatalogRef::Album(pair[1].to_string()))
            }
            _ => {}
        }
    }
    None
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

struct BearerToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Catalog API client holding the client-credentials token
pub struct CatalogClient {
    http: reqwest::Client,
    client_id: Option<String>,
    client_secret: Option<String>,
    accounts_base: String,
    api_base: String,
    web_base: String,
    token: Mutex<Option<BearerToken>>,
}

impl CatalogClient {
    pub fn new(
        http: reqwest::Client,
        client_id: Option<String>,
        client_secret: Option<String>,
    ) -> Self {
        Self {
            http,
            client_id,
            client_secret,
            accounts_base: "https://accounts.spotify.com".to_string(),
            api_base: "https://api.spotify.com".to_string(),
            web_base: "https://open.spotify.com".to_string(),
            token: Mutex::new(None),
        }
    }

    /// Override service endpoints (used by tests and mirror deployments).
    pub fn with_endpoints(
        mut self,
        accounts_base: impl Into<String>,
        api_base: impl Into<String>,
        web_base: impl Into<String>,
    ) -> Self {
        self.accounts_base = accounts_base.into();
        self.api_base = api_base.into();
        self.web_base = web_base.into();
        self
    }

    pub fn has_credentials(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some()
    }

    /// Public web page for a reference, used by the scrape fallback when the
    /// operator submitted a URI-style identifier.
    pub fn web_url_for(&self, catalog_ref: &CatalogRef) -> String {
        match catalog_ref {
            CatalogRef::Playlist(id) => format!("{}/playlist/{id}", self.web_base),
            CatalogRef::Album(id) => format!("{}/album/{id}", self.web_base),
        }
    }

    /// Current bearer token, refreshing under the lock when it is missing
    /// or within 60 s of expiry.
    async fn bearer_token(&self) -> anyhow::Result<String> {
        let (Some(client_id), Some(client_secret)) = (&self.client_id, &self.client_secret)
        else {
            anyhow::bail!("catalog credentials not configured");
        };

        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if token.expires_at - Utc::now() > Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) {
                return Ok(token.access_token.clone());
            }
        }

        debug!("refreshing catalog bearer token");
        let response: TokenResponse = self
            .http
            .post(format!("{}/api/token", self.accounts_base))
            .basic_auth(client_id, Some(client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let access_token = response.access_token.clone();
        *guard = Some(BearerToken {
            access_token: response.access_token,
            expires_at: Utc::now() + Duration::seconds(response.expires_in),
        });

        Ok(access_token)
    }

    /// Fetch all tracks of a reference through the API, following `next`.
    pub async fn tracks(&self, catalog_ref: &CatalogRef) -> anyhow::Result<Vec<TrackCandidate>> {
        let token = self.bearer_token().await?;

        let mut next_url = Some(match catalog_ref {
            CatalogRef::Playlist(id) => {
                format!("{}/v1/playlists/{id}/tracks?limit=100", self.api_base)
            }
            CatalogRef::Album(id) => {
                format!("{}/v1/albums/{id}/tracks?limit=50", self.api_base)
            }
        });

        let mut candidates = Vec::new();
        while let Some(url) = next_url.take() {
            let page: Value = self
                .http
                .get(&url)
                .bearer_auth(&token)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            if let Some(items) = page.get("items").and_then(Value::as_array) {
                for item in items {
                    // Playlist items wrap the track object; album items are
                    // the track object itself.
                    let track = item.get("track").unwrap_or(item);
                    if let Some(candidate) = candidate_from_api_track(track) {
                        candidates.push(candidate);
                    }
                    if candidates.len() >= MAX_TRACKS_PER_BATCH {
                        return Ok(candidates);
                    }
                }
            }

            next_url = page
                .get("next")
                .and_then(Value::as_str)
                .map(|s| s.to_string());
        }

        Ok(candidates)
    }
}

fn candidate_from_api_track(track: &Value) -> Option<TrackCandidate> {
    let title = track.get("name")?.as_str()?.to_string();
    if title.is_empty() {
        return None;
    }

    let artist = track
        .get("artists")
        .and_then(Value::as_array)
        .and_then(|artists| artists.first())
        .and_then(|a| a.get("name"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let duration_seconds = track
        .get("duration_ms")
        .and_then(Value::as_i64)
        .map(|ms| ms / 1000);

    let thumbnail_url = track
        .get("album")
        .and_then(|album| album.get("images"))
        .and_then(Value::as_array)
        .and_then(|images| images.first())
        .and_then(|image| image.get("url"))
        .and_then(Value::as_str)
        .map(|s| s.to_string());

    Some(TrackCandidate {
        title,
        artist,
        duration_seconds,
        thumbnail_url,
        source_video_id: None,
    })
}

static JSON_LD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<script[^>]+type=["']application/ld\+json["'][^>]*>(.*?)</script>"#)
        .unwrap()
});

static TRACK_ANCHOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<a[^>]+href="[^"]*/track/[^"]*"[^>]*>([^<]{1,200})</a>"#).unwrap()
});

static ARTIST_ANCHOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<a[^>]+href="[^"]*/artist/[^"]*"[^>]*>([^<]{1,200})</a>"#).unwrap()
});

/// Candidates from linked-data blocks of type MusicPlaylist/MusicAlbum.
pub(crate) fn candidates_from_json_ld(html: &str) -> Vec<TrackCandidate> {
    let mut candidates = Vec::new();

    for caps in JSON_LD.captures_iter(html) {
        let Ok(value) = serde_json::from_str::<Value>(caps[1].trim()) else {
            continue;
        };
        let objects: Vec<&Value> = match &value {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };

        for object in objects {
            let type_ok = object
                .get("@type")
                .and_then(Value::as_str)
                .map(|t| t == "MusicPlaylist" || t == "MusicAlbum")
                .unwrap_or(false);
            if !type_ok {
                continue;
            }

            let Some(track_field) = object.get("track") else {
                continue;
            };
            let items: Vec<&Value> = match track_field {
                Value::Array(items) => items.iter().collect(),
                Value::Object(_) => track_field
                    .get("itemListElement")
                    .and_then(Value::as_array)
                    .map(|items| items.iter().collect())
                    .unwrap_or_default(),
                _ => Vec::new(),
            };

            for item in items {
                let node = item.get("item").unwrap_or(item);
                let Some(title) = node.get("name").and_then(Value::as_str) else {
                    continue;
                };
                let artist = node
                    .get("byArtist")
                    .map(|by| match by {
                        Value::Array(artists) => artists
                            .first()
                            .and_then(|a| a.get("name"))
                            .and_then(Value::as_str)
                            .unwrap_or(""),
                        other => other.get("name").and_then(Value::as_str).unwrap_or(""),
                    })
                    .unwrap_or("")
                    .to_string();
                let duration_seconds = node
                    .get("duration")
                    .and_then(Value::as_str)
                    .and_then(parse_iso8601_duration);

                candidates.push(TrackCandidate {
                    title: decode_entities(title),
                    artist: decode_entities(&artist),
                    duration_seconds,
                    thumbnail_url: None,
                    source_video_id: None,
                });
                if candidates.len() >= MAX_TRACKS_PER_BATCH {
                    return candidates;
                }
            }
        }
    }

    candidates
}

/// Candidates from track-row anchors, pairing each track link with the
/// artist link at the same position when present.
pub(crate) fn candidates_from_track_rows(html: &str) -> Vec<TrackCandidate> {
    let titles: Vec<String> = TRACK_ANCHOR
        .captures_iter(html)
        .map(|caps| decode_entities(&caps[1]))
        .filter(|t| !t.is_empty())
        .take(MAX_TRACKS_PER_BATCH)
        .collect();
    let artists: Vec<String> = ARTIST_ANCHOR
        .captures_iter(html)
        .map(|caps| decode_entities(&caps[1]))
        .collect();

    titles
        .into_iter()
        .enumerate()
        .map(|(i, title)| TrackCandidate {
            title,
            artist: artists.get(i).cloned().unwrap_or_default(),
            duration_seconds: None,
            thumbnail_url: None,
            source_video_id: None,
        })
        .collect()
}

/// Parse ISO 8601 durations of the PT#H#M#S shape used by linked data.
pub(crate) fn parse_iso8601_duration(raw: &str) -> Option<i64> {
    static ISO_DURATION: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)^PT(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?$").unwrap()
    });
    let caps = ISO_DURATION.captures(raw.trim())?;
    let hours: i64 = caps.get(1).map_or(0, |m| m.as_str().parse().unwrap_or(0));
    let minutes: i64 = caps.get(2).map_or(0, |m| m.as_str().parse().unwrap_or(0));
    let seconds: i64 = caps.get(3).map_or(0, |m| m.as_str().parse().unwrap_or(0));
    let total = hours * 3600 + minutes * 60 + seconds;
    (total > 0).then_some(total)
}

/// The variant B extractor: API first, scrape fallback
pub struct CatalogExtractor {
    client: std::sync::Arc<CatalogClient>,
    http: reqwest::Client,
}

impl CatalogExtractor {
    pub fn new(client: std::sync::Arc<CatalogClient>, http: reqwest::Client) -> Self {
        Self { client, http }
    }

    async fn scrape_page(&self, page_url: &str) -> anyhow::Result<Vec<TrackCandidate>> {
        let html = self
            .http
            .get(page_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let from_ld = candidates_from_json_ld(&html);
        if !from_ld.is_empty() {
            return Ok(from_ld);
        }

        let from_rows = candidates_from_track_rows(&html);
        if !from_rows.is_empty() {
            return Ok(from_rows);
        }

        // Last ditch: one candidate from the page title and the first
        // segment of its description.
        if let Some(title) = og_meta(&html, "og:title") {
            let description = og_meta(&html, "og:description");
            return Ok(vec![candidate_from_meta(
                &title,
                description.as_deref(),
                og_meta(&html, "og:image").as_deref(),
            )]);
        }

        Ok(Vec::new())
    }
}

#[async_trait]
impl SourceExtractor for CatalogExtractor {
    async fn extract(&self, url: &str) -> Vec<TrackCandidate> {
        let catalog_ref = parse_catalog_ref(url);

        if let Some(catalog_ref) = &catalog_ref {
            if self.client.has_credentials() {
                match self.client.tracks(catalog_ref).await {
                    Ok(candidates) if !candidates.is_empty() => return candidates,
                    Ok(_) => {
                        warn!(url = %url, "catalog API returned no tracks, falling back to scrape")
                    }
                    Err(e) => {
                        warn!(url = %url, error = %e, "catalog API failed, falling back to scrape")
                    }
                }
            }
        }

        let page_url = match &catalog_ref {
            Some(r) if !url.contains("://") => self.client.web_url_for(r),
            _ => url.to_string(),
        };

        match self.scrape_page(&page_url).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(url = %page_url, error = %e, "catalog page scrape failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_ref_from_web_urls() {
        assert_eq!(
            parse_catalog_ref("https://open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5M"),
            Some(CatalogRef::Playlist("37i9dQZF1DXcBWIGoYBM5M".into()))
        );
        assert_eq!(
            parse_catalog_ref("https://open.spotify.com/album/4aawyAB9vmqN3uQ7FjRGTy?si=x"),
            Some(CatalogRef::Album("4aawyAB9vmqN3uQ7FjRGTy".into()))
        );
        assert_eq!(
            parse_catalog_ref("https://open.spotify.com/intl-de/album/4aawyAB9vmqN3uQ7FjRGTy"),
            Some(CatalogRef::Album("4aawyAB9vmqN3uQ7FjRGTy".into()))
        );
    }

    #[test]
    fn catalog_ref_from_uris() {
        assert_eq!(
            parse_catalog_ref("spotify:playlist:37i9dQZF1DXcBWIGoYBM5M"),
            Some(CatalogRef::Playlist("37i9dQZF1DXcBWIGoYBM5M".into()))
        );
        assert_eq!(
            parse_catalog_ref("spotify:album:4aawyAB9vmqN3uQ7FjRGTy"),
            Some(CatalogRef::Album("4aawyAB9vmqN3uQ7FjRGTy".into()))
        );
        assert_eq!(parse_catalog_ref("spotify:track:abc"), None);
        assert_eq!(parse_catalog_ref("not a ref"), None);
    }

    #[test]
    fn json_ld_playlist_parses() {
        let html = r#"<script type="application/ld+json">
        {
            "@type": "MusicPlaylist",
            "name": "Test List",
            "track": {
                "itemListElement": [
                    {"item": {"name": "Song One", "byArtist": {"name": "Artist A"}, "duration": "PT3M20S"}},
                    {"item": {"name": "Song Two", "byArtist": [{"name": "Artist B"}]}}
                ]
            }
        }
        </script>"#;

        let candidates = candidates_from_json_ld(html);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].title, "Song One");
        assert_eq!(candidates[0].artist, "Artist A");
        assert_eq!(candidates[0].duration_seconds, Some(200));
        assert_eq!(candidates[1].artist, "Artist B");
        assert_eq!(candidates[1].duration_seconds, None);
    }

    #[test]
    fn json_ld_album_track_array() {
        let html = r#"<script type="application/ld+json">
        {"@type": "MusicAlbum", "track": [{"name": "Only Song", "byArtist": {"name": "Band"}}]}
        </script>"#;

        let candidates = candidates_from_json_ld(html);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].title, "Only Song");
    }

    #[test]
    fn track_row_anchors_pair_with_artists() {
        let html = r#"
        <a href="/track/1">First Song</a><a href="/artist/9">Artist X</a>
        <a href="/track/2">Second Song</a>
        "#;

        let candidates = candidates_from_track_rows(html);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].title, "First Song");
        assert_eq!(candidates[0].artist, "Artist X");
        assert_eq!(candidates[1].artist, "");
    }

    #[test]
    fn iso8601_durations() {
        assert_eq!(parse_iso8601_duration("PT3M20S"), Some(200));
        assert_eq!(parse_iso8601_duration("PT1H2M3S"), Some(3723));
        assert_eq!(parse_iso8601_duration("PT45S"), Some(45));
        assert_eq!(parse_iso8601_duration("3:20"), None);
    }
}
