//! Variant A: video platform playlist extractor
//!
//! Pages through the platform's playlist API until the list is exhausted or
//! the batch cap is hit. Every candidate carries its `source_video_id`, so
//! these tracks take the mapper fast path straight to the queue.

use super::{SourceExtractor, TrackCandidate, MAX_TRACKS_PER_BATCH};
use crate::platform::PlatformClient;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

pub struct VideoPlaylistExtractor {
    platform: Arc<PlatformClient>,
}

impl VideoPlaylistExtractor {
    pub fn new(platform: Arc<PlatformClient>) -> Self {
        Self { platform }
    }

    async fn extract_inner(&self, url: &str) -> anyhow::Result<Vec<TrackCandidate>> {
        let playlist_id = parse_playlist_id(url)
            .ok_or_else(|| anyhow::anyhow!("no playlist id in url: {url}"))?;

        let mut candidates = Vec::new();
        let mut page = self.platform.playlist(&playlist_id).await?;

        loop {
            for entry in &page.related_streams {
                if candidates.len() >= MAX_TRACKS_PER_BATCH {
                    break;
                }
                candidates.push(TrackCandidate {
                    title: entry.title.clone(),
                    artist: entry.uploader_name.clone(),
                    duration_seconds: (entry.duration > 0).then_some(entry.duration),
                    thumbnail_url: (!entry.thumbnail.is_empty())
                        .then(|| entry.thumbnail.clone()),
                    source_video_id: entry.video_id(),
                });
            }

            if candidates.len() >= MAX_TRACKS_PER_BATCH {
                break;
            }
            match &page.nextpage {
                Some(token) => {
                    page = self.platform.playlist_next(&playlist_id, token).await?;
                }
                None => break,
            }
        }

        debug!(
            playlist_id = %playlist_id,
            count = candidates.len(),
            "playlist extraction complete"
        );

        Ok(candidates)
    }
}

#[async_trait]
impl SourceExtractor for VideoPlaylistExtractor {
    async fn extract(&self, url: &str) -> Vec<TrackCandidate> {
        match self.extract_inner(url).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(url = %url, error = %e, "playlist extraction failed");
                Vec::new()
            }
        }
    }
}

/// Pull the playlist id from a playlist URL (`list=` query parameter or a
/// `/playlist/<id>` path segment).
pub fn parse_playlist_id(url: &str) -> Option<String> {
    if let Ok(parsed) = Url::parse(url) {
        if let Some((_, id)) = parsed.query_pairs().find(|(k, _)| k == "list") {
            if !id.is_empty() {
                return Some(id.into_owned());
            }
        }
        let mut segments = parsed.path_segments()?;
        while let Some(segment) = segments.next() {
            if segment == "playlist" {
                if let Some(id) = segments.next() {
                    if !id.is_empty() {
                        return Some(id.to_string());
                    }
                }
            }
        }
        return None;
    }
    // Bare playlist id
    (!url.is_empty() && !url.contains('/')).then(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playlist_id_from_query_param() {
        assert_eq!(
            parse_playlist_id("https://www.youtube.com/playlist?list=PLabc123"),
            Some("PLabc123".to_string())
        );
        assert_eq!(
            parse_playlist_id("https://www.youtube.com/watch?v=x&list=PLxyz"),
            Some("PLxyz".to_string())
        );
    }

    #[test]
    fn playlist_id_from_path() {
        assert_eq!(
            parse_playlist_id("https://piped.example.org/playlist/PLdef"),
            Some("PLdef".to_string())
        );
    }

    #[test]
    fn playlist_id_bare() {
        assert_eq!(parse_playlist_id("PLabc"), Some("PLabc".to_string()));
        assert_eq!(
            parse_playlist_id("https://example.com/nothing-here"),
            None
        );
    }
}
