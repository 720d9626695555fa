//! Variant C: scrape-only extractor, plus shared HTML helpers
//!
//! For catalogs we have no API for, the only signal is the public page's
//! meta tags. Emits at most one candidate.

use super::{SourceExtractor, TrackCandidate};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

static OG_TITLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<meta[^>]+property=["']og:title["'][^>]+content=["']([^"']+)["']"#).unwrap()
});
static OG_TITLE_REV: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<meta[^>]+content=["']([^"']+)["'][^>]+property=["']og:title["']"#).unwrap()
});
static OG_DESCRIPTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<meta[^>]+property=["']og:description["'][^>]+content=["']([^"']+)["']"#)
        .unwrap()
});
static OG_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<meta[^>]+property=["']og:image["'][^>]+content=["']([^"']+)["']"#).unwrap()
});

/// First capture of an og: meta tag, handling attribute order both ways for
/// og:title (the one that matters most).
pub(crate) fn og_meta(html: &str, property: &str) -> Option<String> {
    let re = match property {
        "og:title" => &*OG_TITLE,
        "og:description" => &*OG_DESCRIPTION,
        "og:image" => &*OG_IMAGE,
        _ => return None,
    };
    if let Some(caps) = re.captures(html) {
        return Some(decode_entities(&caps[1]));
    }
    if property == "og:title" {
        if let Some(caps) = OG_TITLE_REV.captures(html) {
            return Some(decode_entities(&caps[1]));
        }
    }
    None
}

/// Minimal HTML entity decoding for meta content.
pub(crate) fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .trim()
        .to_string()
}

/// First segment of a description, split on common separators.
pub(crate) fn first_description_segment(description: &str) -> String {
    description
        .split(['·', '•', '|'])
        .next()
        .unwrap_or(description)
        .trim()
        .to_string()
}

/// Build the single candidate from og: meta content.
///
/// Titles often read "Song by Artist"; when that pattern is present both
/// halves are used, otherwise the artist falls back to the description's
/// first segment.
pub(crate) fn candidate_from_meta(
    title: &str,
    description: Option<&str>,
    image: Option<&str>,
) -> TrackCandidate {
    let (title, artist) = match title.split_once(" by ") {
        Some((song, artist)) => (song.trim().to_string(), artist.trim().to_string()),
        None => (
            title.trim().to_string(),
            description.map(first_description_segment).unwrap_or_default(),
        ),
    };

    TrackCandidate {
        title,
        artist,
        duration_seconds: None,
        thumbnail_url: image.map(|s| s.to_string()),
        source_video_id: None,
    }
}

pub struct ScrapeExtractor {
    http: reqwest::Client,
}

impl ScrapeExtractor {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn extract_inner(&self, url: &str) -> anyhow::Result<Vec<TrackCandidate>> {
        let html = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let Some(title) = og_meta(&html, "og:title") else {
            return Ok(Vec::new());
        };
        let description = og_meta(&html, "og:description");
        let image = og_meta(&html, "og:image");

        Ok(vec![candidate_from_meta(
            &title,
            description.as_deref(),
            image.as_deref(),
        )])
    }
}

#[async_trait]
impl SourceExtractor for ScrapeExtractor {
    async fn extract(&self, url: &str) -> Vec<TrackCandidate> {
        match self.extract_inner(url).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(url = %url, error = %e, "page scrape failed");
                Vec::new()
            }
        }
    }
}
