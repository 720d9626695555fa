//! Track mapper: catalog candidate -> playable video id
//!
//! One search per track, filtered down to things that are plausibly the
//! song itself rather than shorts, reactions, or full albums. Confidence is
//! a deterministic token-overlap measure over sanitized titles; anything
//! under the threshold is handed to the operator instead of the queue.

use crate::platform::{PlatformClient, SearchItem};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use tunevault_common::fingerprint::sanitize;

/// Matches below this confidence are tagged low-confidence
pub const CONFIDENCE_THRESHOLD: f64 = 0.75;

/// Longest result accepted, in seconds (filters albums and podcasts)
pub const MAX_DURATION_SECS: i64 = 900;

/// Titles that are almost never the plain song audio. Policy knob: tuned
/// from what actually polluted search results, not exhaustive.
static REJECT_TITLES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(shorts?|news|vlog|unboxing|review|trailer|tutorial|gameplay|podcast|match|highlights|reaction|compilation|full\s+album|full\s+movie|karaoke|remix|slowed|reverb|sped\s+up|bass\s+boosted|instrumental|cover\s+by|drum\s+cover|guitar\s+cover|piano\s+cover|live\s+performance|behind\s+the\s+scenes|interview|making\s+of)\b",
    )
    .unwrap()
});

/// Mapper result: a playable id with its confidence, or nothing
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub video_id: Option<String>,
    pub confidence: f64,
}

impl MatchOutcome {
    pub fn none() -> Self {
        Self {
            video_id: None,
            confidence: 0.0,
        }
    }
}

pub struct TrackMapper {
    platform: Arc<PlatformClient>,
}

impl TrackMapper {
    pub fn new(platform: Arc<PlatformClient>) -> Self {
        Self { platform }
    }

    /// Map a (title, artist) pair to a video id.
    ///
    /// Zero surviving candidates yields `(None, 0.0)`; search errors are
    /// treated the same way since the caller's policy is identical.
    pub async fn map_track(&self, title: &str, artist: &str) -> MatchOutcome {
        let query = format!("{title} {artist} song");

        let items = match self.platform.search(&query).await {
            Ok(items) => items,
            Err(e) => {
                debug!(query = %query, error = %e, "mapper search failed");
                return MatchOutcome::none();
            }
        };

        let Some(best) = items.iter().find(|item| accept_candidate(item)) else {
            return MatchOutcome::none();
        };

        let Some(video_id) = best.video_id() else {
            return MatchOutcome::none();
        };

        let confidence = title_confidence(title, &best.title);
        debug!(
            query = %query,
            matched = %best.title,
            confidence = confidence,
            "mapper selected candidate"
        );

        MatchOutcome {
            video_id: Some(video_id),
            confidence,
        }
    }
}

/// Whether a title trips the non-music reject pattern.
pub fn is_rejected_title(title: &str) -> bool {
    REJECT_TITLES.is_match(title)
}

/// Survival filter applied in result order; the first survivor wins.
pub fn accept_candidate(item: &SearchItem) -> bool {
    !item.is_short_form_url()
        && !item.is_short
        && item.duration <= MAX_DURATION_SECS
        && !REJECT_TITLES.is_match(&item.title)
}

/// Fraction of the wanted title's sanitized tokens present in the result
/// title. Monotone in overlap and deterministic.
pub fn title_confidence(wanted: &str, got: &str) -> f64 {
    let wanted_tokens: HashSet<String> =
        sanitize(wanted).split_whitespace().map(String::from).collect();
    if wanted_tokens.is_empty() {
        return 0.0;
    }
    let got_tokens: HashSet<String> =
        sanitize(got).split_whitespace().map(String::from).collect();

    let overlap = wanted_tokens.intersection(&got_tokens).count();
    overlap as f64 / wanted_tokens.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(title: &str, duration: i64) -> SearchItem {
        SearchItem {
            url: "/watch?v=abc123".into(),
            title: title.into(),
            uploader_name: "Channel".into(),
            duration,
            thumbnail: String::new(),
            is_short: false,
        }
    }

    #[test]
    fn rejects_non_music_titles() {
        assert!(!accept_candidate(&item("Song Name (Official Trailer)", 200)));
        assert!(!accept_candidate(&item("My reaction to Song Name", 200)));
        assert!(!accept_candidate(&item("Full Album 1978", 200)));
        assert!(!accept_candidate(&item("Song Name karaoke version", 200)));
        assert!(accept_candidate(&item("Song Name (Official Audio)", 200)));
    }

    #[test]
    fn rejects_overlong_and_short_form() {
        assert!(!accept_candidate(&item("Song Name", 901)));
        assert!(accept_candidate(&item("Song Name", 900)));

        let mut shorts = item("Song Name", 45);
        shorts.is_short = true;
        assert!(!accept_candidate(&shorts));

        let mut shorts_url = item("Song Name", 45);
        shorts_url.url = "/shorts/abc123".into();
        assert!(!accept_candidate(&shorts_url));
    }

    #[test]
    fn confidence_is_full_on_exact_title() {
        assert_eq!(title_confidence("Bohemian Rhapsody", "Bohemian Rhapsody"), 1.0);
        // Decoration on the result side does not hurt
        assert_eq!(
            title_confidence("Bohemian Rhapsody", "Bohemian Rhapsody (Official Audio)"),
            1.0
        );
    }

    #[test]
    fn confidence_is_monotone_in_overlap() {
        let full = title_confidence("one two three four", "one two three four");
        let three = title_confidence("one two three four", "one two three");
        let one = title_confidence("one two three four", "one");
        assert!(full > three && three > one && one > 0.0);
    }

    #[test]
    fn confidence_zero_for_empty_or_disjoint() {
        assert_eq!(title_confidence("", "whatever"), 0.0);
        assert_eq!(title_confidence("alpha beta", "gamma delta"), 0.0);
    }

    #[test]
    fn confidence_is_deterministic() {
        let a = title_confidence("Song Name Here", "Song Name Here live");
        let b = title_confidence("Song Name Here", "Song Name Here live");
        assert_eq!(a, b);
    }
}
