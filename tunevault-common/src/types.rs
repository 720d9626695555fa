//! Track/batch state vocabulary shared by the engine and its clients
//!
//! The track state machine and the derived batch state are pure data
//! definitions; all mutation policy lives in the engine's batch manager.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a single track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackStatus {
    /// Row created from an extractor candidate, not yet mapped
    Extracted,
    /// Mapper query in flight
    Matching,
    /// Mapped to a playable source id with acceptable confidence
    Matched,
    /// Mapped, but confidence fell below the acceptance threshold
    MatchedLowConfidence,
    /// Parked for an operator decision
    MatchingManual,
    /// Waiting for a download worker
    Queued,
    /// Claimed by the dispatcher, worker not yet running
    Dispatching,
    /// Worker actively fetching bytes
    Downloading,
    /// Audio file on disk, terminal
    Completed,
    /// Out of retries or unmatchable
    Failed,
}

impl TrackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackStatus::Extracted => "EXTRACTED",
            TrackStatus::Matching => "MATCHING",
            TrackStatus::Matched => "MATCHED",
            TrackStatus::MatchedLowConfidence => "MATCHED_LOW_CONFIDENCE",
            TrackStatus::MatchingManual => "MATCHING_MANUAL",
            TrackStatus::Queued => "QUEUED",
            TrackStatus::Dispatching => "DISPATCHING",
            TrackStatus::Downloading => "DOWNLOADING",
            TrackStatus::Completed => "COMPLETED",
            TrackStatus::Failed => "FAILED",
        }
    }

    /// Whether `self -> next` is a legal edge of the track state machine.
    ///
    /// Anything not listed here is treated by the batch manager as a silent
    /// no-op: the store is not touched.
    pub fn can_transition_to(&self, next: TrackStatus) -> bool {
        use TrackStatus::*;
        matches!(
            (*self, next),
            (Extracted, Matching | Matched | Queued)
                | (Matching, Matched | MatchedLowConfidence | Failed)
                | (Matched, Queued)
                | (MatchedLowConfidence, Matched | Matching | MatchingManual)
                | (MatchingManual, Matched | MatchedLowConfidence | Failed)
                | (Queued, Dispatching)
                | (Dispatching, Downloading | Queued)
                | (Downloading, Completed | Failed | Queued)
                | (Failed, Queued)
        )
    }

    /// Terminal states never leave via any edge except FAILED -> QUEUED.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TrackStatus::Completed | TrackStatus::Failed)
    }
}

impl fmt::Display for TrackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EXTRACTED" => Ok(TrackStatus::Extracted),
            "MATCHING" => Ok(TrackStatus::Matching),
            "MATCHED" => Ok(TrackStatus::Matched),
            "MATCHED_LOW_CONFIDENCE" => Ok(TrackStatus::MatchedLowConfidence),
            "MATCHING_MANUAL" => Ok(TrackStatus::MatchingManual),
            "QUEUED" => Ok(TrackStatus::Queued),
            "DISPATCHING" => Ok(TrackStatus::Dispatching),
            "DOWNLOADING" => Ok(TrackStatus::Downloading),
            "COMPLETED" => Ok(TrackStatus::Completed),
            "FAILED" => Ok(TrackStatus::Failed),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown track status: {other}"
            ))),
        }
    }
}

/// Lifecycle state of a batch, derived from its tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchState {
    Extracting,
    Matching,
    Downloading,
    AwaitingUser,
    Queued,
    Completed,
    Failed,
}

impl BatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Extracting => "EXTRACTING",
            BatchState::Matching => "MATCHING",
            BatchState::Downloading => "DOWNLOADING",
            BatchState::AwaitingUser => "AWAITING_USER",
            BatchState::Queued => "QUEUED",
            BatchState::Completed => "COMPLETED",
            BatchState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchState {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EXTRACTING" => Ok(BatchState::Extracting),
            "MATCHING" => Ok(BatchState::Matching),
            "DOWNLOADING" => Ok(BatchState::Downloading),
            "AWAITING_USER" => Ok(BatchState::AwaitingUser),
            "QUEUED" => Ok(BatchState::Queued),
            "COMPLETED" => Ok(BatchState::Completed),
            "FAILED" => Ok(BatchState::Failed),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown batch state: {other}"
            ))),
        }
    }
}

/// Origin catalog of a submitted URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcePlatform {
    /// The video platform itself (playlist import with direct source ids)
    VideoPlatform,
    /// The authenticated catalog service (playlists and albums)
    Catalog,
    /// Anything else we can only scrape a page from
    PageScrape,
}

impl SourcePlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourcePlatform::VideoPlatform => "video_platform",
            SourcePlatform::Catalog => "catalog",
            SourcePlatform::PageScrape => "page_scrape",
        }
    }
}

impl fmt::Display for SourcePlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourcePlatform {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "video_platform" => Ok(SourcePlatform::VideoPlatform),
            "catalog" => Ok(SourcePlatform::Catalog),
            "page_scrape" => Ok(SourcePlatform::PageScrape),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown source platform: {other}"
            ))),
        }
    }
}

/// Per-status track counts for one batch, as read from the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
    pub low_confidence: i64,
    /// MATCHING + QUEUED + DISPATCHING + DOWNLOADING
    pub active: i64,
}

/// Derive the batch state from the multiset of its tracks' statuses.
///
/// An all-failed batch is FAILED, not COMPLETED, so that rule is checked
/// before the completion rule. A batch with zero tracks keeps whatever
/// state submission gave it; callers must not invoke this with total == 0.
pub fn derive_batch_state(counts: &StatusCounts) -> BatchState {
    if counts.total > 0 && counts.failed == counts.total {
        BatchState::Failed
    } else if counts.completed + counts.failed == counts.total && counts.low_confidence == 0 {
        BatchState::Completed
    } else if counts.low_confidence > 0 && counts.active == 0 {
        BatchState::AwaitingUser
    } else if counts.active > 0 {
        BatchState::Downloading
    } else {
        BatchState::Queued
    }
}
