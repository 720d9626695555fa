//! Batch and track row models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tunevault_common::types::{BatchState, SourcePlatform, TrackStatus};
use uuid::Uuid;

/// Maximum download attempts for one track before it goes terminal
pub const MAX_RETRIES: i64 = 3;

/// A submitted playlist/album import unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub source_url: String,
    pub source_platform: SourcePlatform,
    pub state: BatchState,
    pub total_tracks: i64,
    pub completed_count: i64,
    pub failed_count: i64,
    pub error_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Batch {
    pub fn new(source_url: &str, source_platform: SourcePlatform) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source_url: source_url.to_string(),
            source_platform,
            state: BatchState::Extracting,
            total_tracks: 0,
            completed_count: 0,
            failed_count: 0,
            error_code: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A single song within a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub fingerprint: String,
    pub title: String,
    pub artist: String,
    pub duration_seconds: Option<i64>,
    pub thumbnail_url: Option<String>,
    pub source_platform: SourcePlatform,
    pub source_video_id: Option<String>,
    pub match_confidence: Option<f64>,
    pub status: TrackStatus,
    pub retry_count: i64,
    pub bytes_downloaded: i64,
    pub total_bytes: i64,
    pub output_file_path: Option<String>,
    pub error_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Track {
    /// Build a fresh EXTRACTED row from an extractor candidate.
    pub fn from_candidate(
        batch_id: Uuid,
        platform: SourcePlatform,
        candidate: &crate::extractor::TrackCandidate,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            batch_id,
            fingerprint: tunevault_common::fingerprint::fingerprint(
                &candidate.title,
                &candidate.artist,
                candidate.duration_seconds,
            ),
            title: candidate.title.clone(),
            artist: candidate.artist.clone(),
            duration_seconds: candidate.duration_seconds,
            thumbnail_url: candidate.thumbnail_url.clone(),
            source_platform: platform,
            source_video_id: candidate.source_video_id.clone(),
            match_confidence: None,
            status: TrackStatus::Extracted,
            retry_count: 0,
            bytes_downloaded: 0,
            total_bytes: 0,
            output_file_path: None,
            error_code: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Outcome of a batch submission, returned to the facade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,
    #[serde(rename = "trackCount", skip_serializing_if = "Option::is_none")]
    pub track_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ImportResult {
    pub fn ok(batch_id: Uuid, track_count: usize) -> Self {
        Self {
            success: true,
            batch_id: Some(batch_id),
            track_count: Some(track_count),
            error: None,
        }
    }

    pub fn failed(batch_id: Option<Uuid>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            batch_id,
            track_count: None,
            error: Some(error.into()),
        }
    }
}
