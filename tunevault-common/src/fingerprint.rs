//! Text normalization and track fingerprinting
//!
//! A fingerprint identifies "the same song" across catalogs whose titles
//! differ only in decoration: bracketed qualifiers, feat. credits, quality
//! tags, punctuation. Durations are fuzzed into 5-second buckets so that
//! slightly different catalog durations still collide.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

/// Duration bucket width in seconds
const DURATION_BUCKET_SECS: f64 = 5.0;

/// Maximum length of a generated file name (without extension)
const MAX_FILENAME_LEN: usize = 80;

/// Whole-word tokens dropped from titles and artists during sanitization
const STOP_WORDS: &[&str] = &[
    "feat",
    "ft",
    "official",
    "video",
    "audio",
    "remastered",
    "lyrics",
    "hq",
    "hd",
];

static BRACKETED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\([^()]*\)|\[[^\[\]]*\]").unwrap());

static HIGH_QUALITY: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bhigh\s+quality\b").unwrap());

/// Normalize free-form title/artist text for matching and fingerprinting.
///
/// Lowercases, removes `(...)` and `[...]` segments, drops stop-list words,
/// strips everything but alphanumerics and whitespace, and collapses
/// whitespace. Idempotent: `sanitize(sanitize(x)) == sanitize(x)`.
pub fn sanitize(text: &str) -> String {
    let mut s = text.to_lowercase();

    // Bracketed segments can nest one level deep in the wild; strip until
    // the pattern stops matching.
    loop {
        let stripped = BRACKETED.replace_all(&s, " ").into_owned();
        if stripped == s {
            break;
        }
        s = stripped;
    }

    let s = HIGH_QUALITY.replace_all(&s, " ");

    let s: String = s
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();

    s.split_whitespace()
        .filter(|word| !STOP_WORDS.contains(word))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Round a duration into its 5-second bucket.
pub fn duration_bucket(duration_seconds: i64) -> i64 {
    ((duration_seconds as f64 / DURATION_BUCKET_SECS).round() * DURATION_BUCKET_SECS) as i64
}

/// Stable 256-bit digest over normalized (title, artist, duration bucket).
///
/// Deterministic across processes; the only inputs are the sanitized texts
/// and the bucketed duration, joined with `|`.
pub fn fingerprint(title: &str, artist: &str, duration_seconds: Option<i64>) -> String {
    let mut input = format!("{}|{}", sanitize(title), sanitize(artist));
    if let Some(duration) = duration_seconds {
        input.push('|');
        input.push_str(&duration_bucket(duration).to_string());
    }

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Reduce a track title to a safe file name: keep `[A-Za-z0-9 _-]`, trim,
/// truncate to 80 characters.
pub fn sanitize_filename(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ' || *c == '_' || *c == '-')
        .collect();
    let trimmed = kept.trim();
    let mut out: String = trimmed.chars().take(MAX_FILENAME_LEN).collect();
    while out.ends_with(' ') {
        out.pop();
    }
    if out.is_empty() {
        out.push_str("untitled");
    }
    out
}

/// Format a byte count as a human-readable string.
pub fn human_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if value < 1024.0 {
            return format!("{value:.1} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.1} TB")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_decoration() {
        assert_eq!(
            sanitize("Bohemian Rhapsody (Official Video) [Remastered]"),
            "bohemian rhapsody"
        );
        assert_eq!(sanitize("Song!!! feat. Somebody"), "song somebody");
        assert_eq!(sanitize("Track HQ High Quality"), "track");
    }

    #[test]
    fn sanitize_is_idempotent() {
        for input in [
            "Bohemian Rhapsody (Official Video)",
            "  weird   spacing\tand-punct!  ",
            "ft official audio lyrics",
            "",
        ] {
            let once = sanitize(input);
            assert_eq!(sanitize(&once), once);
        }
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let a = fingerprint("Bohemian Rhapsody", "Queen", Some(354));
        let b = fingerprint("Bohemian Rhapsody", "Queen", Some(354));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn fingerprint_fuzzes_duration_into_buckets() {
        // 353..=357 all round to the 355 bucket
        let base = fingerprint("Song", "Artist", Some(355));
        assert_eq!(fingerprint("Song", "Artist", Some(353)), base);
        assert_eq!(fingerprint("Song", "Artist", Some(357)), base);
        assert_ne!(fingerprint("Song", "Artist", Some(350)), base);
    }

    #[test]
    fn fingerprint_bucketing_is_idempotent() {
        let raw = 233;
        let bucket = duration_bucket(raw);
        assert_eq!(duration_bucket(bucket), bucket);
        assert_eq!(
            fingerprint("Song", "Artist", Some(raw)),
            fingerprint("Song", "Artist", Some(bucket))
        );
    }

    #[test]
    fn fingerprint_without_duration_differs() {
        assert_ne!(
            fingerprint("Song", "Artist", None),
            fingerprint("Song", "Artist", Some(200))
        );
    }

    #[test]
    fn filename_keeps_only_safe_chars() {
        assert_eq!(sanitize_filename("A/B\\C: D*E?"), "ABC DE");
        assert_eq!(sanitize_filename("  plain name  "), "plain name");
        assert_eq!(sanitize_filename("///"), "untitled");
    }

    #[test]
    fn filename_truncates_to_eighty() {
        let long = "x".repeat(200);
        assert_eq!(sanitize_filename(&long).len(), 80);
    }

    #[test]
    fn human_size_formats_units() {
        assert_eq!(human_size(512), "512.0 B");
        assert_eq!(human_size(2048), "2.0 KB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0 MB");
    }
}
