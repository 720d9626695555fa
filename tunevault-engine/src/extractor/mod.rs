//! Catalog extractors
//!
//! Each variant turns a source URL into an ordered list of track
//! candidates. Extraction failures never propagate: a variant that cannot
//! produce anything returns an empty list and the batch manager fails the
//! batch with a user-readable code.

pub mod catalog;
pub mod scrape;
pub mod video_playlist;

use async_trait::async_trait;
use tunevault_common::types::SourcePlatform;

pub use catalog::CatalogClient;

/// Hard cap on candidates per batch
pub const MAX_TRACKS_PER_BATCH: usize = 500;

/// One song candidate emitted by an extractor
#[derive(Debug, Clone, PartialEq)]
pub struct TrackCandidate {
    pub title: String,
    pub artist: String,
    pub duration_seconds: Option<i64>,
    pub thumbnail_url: Option<String>,
    /// Present when the source already names a playable video id; the
    /// mapper is skipped for these.
    pub source_video_id: Option<String>,
}

/// Common contract for the three extractor variants
#[async_trait]
pub trait SourceExtractor: Send + Sync {
    /// Ordered candidates for the URL, bounded to [`MAX_TRACKS_PER_BATCH`].
    /// Errors are swallowed and reported as an empty list.
    async fn extract(&self, url: &str) -> Vec<TrackCandidate>;
}

/// Classify a submitted URL into its origin platform.
pub fn platform_for_url(url: &str) -> SourcePlatform {
    let lower = url.to_lowercase();
    if lower.contains("youtube.com") || lower.contains("youtu.be") || lower.contains("list=") {
        SourcePlatform::VideoPlatform
    } else if lower.contains("spotify.com")
        || lower.starts_with("spotify:")
        || lower.contains("/playlist/")
        || lower.contains("/album/")
    {
        SourcePlatform::Catalog
    } else {
        SourcePlatform::PageScrape
    }
}

/// The engine's extractor set, dispatched by platform
pub struct Extractors {
    pub video_playlist: video_playlist::VideoPlaylistExtractor,
    pub catalog: catalog::CatalogExtractor,
    pub scrape: scrape::ScrapeExtractor,
}

impl Extractors {
    pub async fn extract(&self, url: &str, platform: SourcePlatform) -> Vec<TrackCandidate> {
        let mut candidates = match platform {
            SourcePlatform::VideoPlatform => self.video_playlist.extract(url).await,
            SourcePlatform::Catalog => self.catalog.extract(url).await,
            SourcePlatform::PageScrape => self.scrape.extract(url).await,
        };
        candidates.truncate(MAX_TRACKS_PER_BATCH);
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_classification() {
        assert_eq!(
            platform_for_url("https://www.youtube.com/playlist?list=PL123"),
            SourcePlatform::VideoPlatform
        );
        assert_eq!(
            platform_for_url("https://open.spotify.com/playlist/37i9dQ"),
            SourcePlatform::Catalog
        );
        assert_eq!(
            platform_for_url("spotify:album:4aawyAB9vmqN3uQ7FjRGTy"),
            SourcePlatform::Catalog
        );
        assert_eq!(
            platform_for_url("https://music.example.com/some-page"),
            SourcePlatform::PageScrape
        );
    }
}
