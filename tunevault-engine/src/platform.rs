//! Video platform API client
//!
//! Thin wrapper over the public JSON API exposed by the video platform's
//! proxy instances (search, playlist pagination, stream metadata). All
//! requests go through the single shared HTTP client so connection pooling
//! and timeouts are uniform across the engine.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use tracing::debug;

/// One search result from the platform
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchItem {
    /// Relative watch URL, e.g. "/watch?v=abc123"
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub uploader_name: String,
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub thumbnail: String,
    #[serde(default)]
    pub is_short: bool,
}

impl SearchItem {
    /// Extract the bare video id from the watch URL.
    pub fn video_id(&self) -> Option<String> {
        extract_video_id(&self.url)
    }

    /// Short-form content lives under a dedicated URL prefix.
    pub fn is_short_form_url(&self) -> bool {
        self.url.contains("/shorts/")
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

/// One entry of a playlist page
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistEntry {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub uploader_name: String,
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub thumbnail: String,
}

impl PlaylistEntry {
    pub fn video_id(&self) -> Option<String> {
        extract_video_id(&self.url)
    }
}

/// One page of playlist entries plus the continuation token
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistPage {
    #[serde(default)]
    pub related_streams: Vec<PlaylistEntry>,
    #[serde(default)]
    pub nextpage: Option<String>,
}

/// A single media stream advertised for a video
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEntry {
    pub url: String,
    #[serde(default)]
    pub bitrate: i64,
    #[serde(default)]
    pub mime_type: String,
}

/// Stream metadata for one video id
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamsResponse {
    #[serde(default)]
    pub audio_streams: Vec<StreamEntry>,
    #[serde(default)]
    pub video_streams: Vec<StreamEntry>,
}

/// Video platform API client bound to a primary instance
#[derive(Clone)]
pub struct PlatformClient {
    http: reqwest::Client,
    instance: String,
}

impl PlatformClient {
    pub fn new(http: reqwest::Client, instance: impl Into<String>) -> Self {
        Self {
            http,
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Full-text video search.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchItem>> {
        debug!(query = %query, "platform search");

        let response: SearchResponse = self
            .http
            .get(format!("{}/search", self.instance))
            .query(&[("q", query), ("filter", "videos")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response.items)
    }

    /// First page of a playlist.
    pub async fn playlist(&self, playlist_id: &str) -> Result<PlaylistPage> {
        let page: PlaylistPage = self
            .http
            .get(format!("{}/playlists/{}", self.instance, playlist_id))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(page)
    }

    /// Continuation page of a playlist.
    pub async fn playlist_next(&self, playlist_id: &str, nextpage: &str) -> Result<PlaylistPage> {
        let page: PlaylistPage = self
            .http
            .get(format!(
                "{}/nextpage/playlists/{}",
                self.instance, playlist_id
            ))
            .query(&[("nextpage", nextpage)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(page)
    }

    /// Stream metadata from an arbitrary instance (primary or mirror).
    pub async fn streams_from(&self, instance: &str, video_id: &str) -> Result<StreamsResponse> {
        let response = self
            .http
            .get(format!("{instance}/streams/{video_id}"))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "stream metadata request failed with {}",
                response.status()
            ));
        }

        Ok(response.json().await?)
    }
}

/// Pull a video id out of a watch URL or bare id.
pub fn extract_video_id(url: &str) -> Option<String> {
    if let Some(idx) = url.find("v=") {
        let rest = &url[idx + 2..];
        let end = rest.find('&').unwrap_or(rest.len());
        let id = &rest[..end];
        return (!id.is_empty()).then(|| id.to_string());
    }
    if let Some(idx) = url.rfind("/shorts/").map(|i| i + "/shorts/".len()) {
        let id = url[idx..].split(['?', '&']).next().unwrap_or("");
        return (!id.is_empty()).then(|| id.to_string());
    }
    if let Some(idx) = url.rfind("youtu.be/").map(|i| i + "youtu.be/".len()) {
        let id = url[idx..].split(['?', '&']).next().unwrap_or("");
        return (!id.is_empty()).then(|| id.to_string());
    }
    // A bare 11-character id passes through unchanged.
    if !url.contains('/') && !url.contains('=') && !url.is_empty() {
        return Some(url.to_string());
    }
    None
}
