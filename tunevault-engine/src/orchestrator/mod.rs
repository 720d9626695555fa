//! Batch manager: the engine's scheduling and state-machine core
//!
//! Owns the only mutable view of track state. Every transition goes through
//! the mutex here, so legality checks and the derived batch state are
//! always computed against a consistent snapshot. Workers, the dispatcher,
//! the watchdog, and human actions all funnel into the same two entry
//! points: [`BatchManager::transition`] and the dispatch claim.

pub mod dispatch;
pub mod watchdog;

use crate::db;
use crate::extractor::{platform_for_url, Extractors, MAX_TRACKS_PER_BATCH};
use crate::matcher::{TrackMapper, CONFIDENCE_THRESHOLD};
use crate::models::{Batch, ImportResult, Track};
use crate::resolver::StreamResolver;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};
use tunevault_common::events::{EngineEvent, EventBus};
use tunevault_common::types::{derive_batch_state, BatchState, TrackStatus};
use uuid::Uuid;

/// Upper bound of the adaptive concurrency governor
pub const MAX_CONCURRENT: usize = 8;

/// The governor never throttles below this
pub const MIN_CONCURRENT: usize = 2;

/// Concurrent mapper queries during the matching phase
pub const MATCH_CONCURRENCY: usize = 3;

pub struct BatchManager {
    pub(crate) db: SqlitePool,
    pub(crate) http: reqwest::Client,
    pub(crate) resolver: Arc<StreamResolver>,
    pub(crate) mapper: TrackMapper,
    pub(crate) extractors: Extractors,
    pub(crate) events: EventBus,
    pub(crate) music_dir: PathBuf,

    /// Serializes every state transition; see module docs
    pub(crate) transition_lock: Mutex<()>,

    pub(crate) active_workers: AtomicUsize,
    pub(crate) current_max_concurrent: AtomicUsize,
    pub(crate) consecutive_rate_limits: AtomicU32,
    pub(crate) rate_limit_until: StdMutex<Option<Instant>>,
    pub(crate) last_success: StdMutex<Option<Instant>>,
    pub(crate) is_recovering: AtomicBool,

    /// track id -> last progress timestamp, maintained by workers
    pub(crate) watchdog: DashMap<Uuid, Instant>,
    pub(crate) match_permits: Arc<Semaphore>,
}

impl BatchManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: SqlitePool,
        http: reqwest::Client,
        resolver: Arc<StreamResolver>,
        mapper: TrackMapper,
        extractors: Extractors,
        events: EventBus,
        music_dir: PathBuf,
    ) -> Arc<Self> {
        Arc::new(Self {
            db,
            http,
            resolver,
            mapper,
            extractors,
            events,
            music_dir,
            transition_lock: Mutex::new(()),
            active_workers: AtomicUsize::new(0),
            current_max_concurrent: AtomicUsize::new(MAX_CONCURRENT),
            consecutive_rate_limits: AtomicU32::new(0),
            rate_limit_until: StdMutex::new(None),
            last_success: StdMutex::new(None),
            is_recovering: AtomicBool::new(false),
            watchdog: DashMap::new(),
            match_permits: Arc::new(Semaphore::new(MATCH_CONCURRENCY)),
        })
    }

    pub fn music_dir(&self) -> &std::path::Path {
        &self.music_dir
    }

    pub fn current_max_concurrent(&self) -> usize {
        self.current_max_concurrent.load(Ordering::SeqCst)
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    /// Attempt a state transition under the mutex.
    ///
    /// Illegal edges are a silent no-op (the store is not touched) and
    /// return `None`. A successful transition persists the new status,
    /// recomputes the derived batch state, and emits events.
    pub async fn transition(&self, track_id: Uuid, to: TrackStatus) -> Option<Track> {
        let _guard = self.transition_lock.lock().await;
        self.transition_locked(track_id, to).await
    }

    /// Transition body for callers already holding the mutex.
    pub(crate) async fn transition_locked(
        &self,
        track_id: Uuid,
        to: TrackStatus,
    ) -> Option<Track> {
        let track = match db::tracks::get_track(&self.db, track_id).await {
            Ok(Some(track)) => track,
            Ok(None) => {
                debug!(track_id = %track_id, "transition on unknown track ignored");
                return None;
            }
            Err(e) => {
                warn!(track_id = %track_id, error = %e, "transition read failed");
                return None;
            }
        };

        if !track.status.can_transition_to(to) {
            debug!(
                track_id = %track_id,
                from = %track.status,
                to = %to,
                "illegal transition ignored"
            );
            return None;
        }

        if let Err(e) = db::tracks::set_track_status(&self.db, track_id, to).await {
            warn!(track_id = %track_id, error = %e, "transition write failed");
            return None;
        }

        // Byte counters restart with the next attempt.
        if to == TrackStatus::Queued {
            let _ = db::tracks::reset_track_bytes(&self.db, track_id).await;
        }

        self.events.emit(EngineEvent::TrackStatusChanged {
            track_id,
            batch_id: track.batch_id,
            status: to,
            timestamp: Utc::now(),
        });

        self.refresh_batch_state(track.batch_id).await;

        match db::tracks::get_track(&self.db, track_id).await {
            Ok(track) => track,
            Err(_) => None,
        }
    }

    /// Recompute the derived batch state from the track multiset and
    /// persist it together with the terminal counts.
    pub(crate) async fn refresh_batch_state(&self, batch_id: Uuid) {
        let counts = match db::tracks::count_statuses_for_batch(&self.db, batch_id).await {
            Ok(counts) => counts,
            Err(e) => {
                warn!(batch_id = %batch_id, error = %e, "failed to count batch statuses");
                return;
            }
        };
        if counts.total == 0 {
            return;
        }

        let state = derive_batch_state(&counts);
        if let Err(e) = db::batches::update_batch_counts(
            &self.db,
            batch_id,
            state,
            counts.completed,
            counts.failed,
        )
        .await
        {
            warn!(batch_id = %batch_id, error = %e, "failed to persist batch state");
            return;
        }

        self.events.emit(EngineEvent::BatchStateChanged {
            batch_id,
            state,
            completed: counts.completed,
            failed: counts.failed,
            total: counts.total,
            timestamp: Utc::now(),
        });
    }

    /// Submit a playlist/album URL as a new batch.
    ///
    /// Extraction runs inline; matching is launched in the background and
    /// the result describes what was inserted.
    pub async fn submit_batch(self: &Arc<Self>, url: &str) -> ImportResult {
        let platform = platform_for_url(url);
        let batch = Batch::new(url, platform);
        let batch_id = batch.id;

        if let Err(e) = db::batches::insert_batch(&self.db, &batch).await {
            warn!(url = %url, error = %e, "failed to insert batch");
            return ImportResult::failed(None, "internal error");
        }

        info!(batch_id = %batch_id, url = %url, platform = %platform, "batch submitted, extracting");

        let candidates = self.extractors.extract(url, platform).await;

        if candidates.is_empty() {
            self.fail_batch(batch_id, "could not extract").await;
            return ImportResult::failed(Some(batch_id), "could not extract");
        }
        if candidates.len() > MAX_TRACKS_PER_BATCH {
            self.fail_batch(batch_id, "too large").await;
            return ImportResult::failed(Some(batch_id), "too large");
        }

        let tracks: Vec<Track> = candidates
            .iter()
            .map(|candidate| Track::from_candidate(batch_id, platform, candidate))
            .collect();

        let inserted = match db::tracks::insert_tracks_bulk(&self.db, &tracks).await {
            Ok(n) => n,
            Err(e) => {
                warn!(batch_id = %batch_id, error = %e, "failed to insert tracks");
                self.fail_batch(batch_id, "internal error").await;
                return ImportResult::failed(Some(batch_id), "internal error");
            }
        };

        let _ = db::batches::set_batch_total(&self.db, batch_id, inserted as i64).await;
        let _ =
            db::batches::set_batch_state(&self.db, batch_id, BatchState::Matching, None).await;

        info!(
            batch_id = %batch_id,
            candidates = candidates.len(),
            inserted = inserted,
            "extraction complete, matching"
        );

        self.events.emit(EngineEvent::BatchSubmitted {
            batch_id,
            track_count: inserted,
            timestamp: Utc::now(),
        });

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_matching(batch_id).await;
        });

        ImportResult::ok(batch_id, inserted)
    }

    async fn fail_batch(&self, batch_id: Uuid, error_code: &str) {
        warn!(batch_id = %batch_id, error_code = error_code, "batch failed");
        let _ =
            db::batches::set_batch_state(&self.db, batch_id, BatchState::Failed, Some(error_code))
                .await;
        self.events.emit(EngineEvent::BatchFailed {
            batch_id,
            error: error_code.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Matching phase: every EXTRACTED track of the batch goes through the
    /// mapper, bounded by the matching semaphore.
    async fn run_matching(self: Arc<Self>, batch_id: Uuid) {
        let tracks = match db::tracks::get_tracks_for_batch(&self.db, batch_id).await {
            Ok(tracks) => tracks,
            Err(e) => {
                warn!(batch_id = %batch_id, error = %e, "failed to load tracks for matching");
                return;
            }
        };

        let mut handles = Vec::new();
        for track in tracks {
            if track.status != TrackStatus::Extracted {
                continue;
            }
            let this = Arc::clone(&self);
            let permits = Arc::clone(&self.match_permits);
            handles.push(tokio::spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                this.match_track(track).await;
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        info!(batch_id = %batch_id, "matching phase complete");
    }

    /// Map one track. Fast path for candidates that already carry a source
    /// id; otherwise a mapper query decides the route.
    pub(crate) async fn match_track(self: &Arc<Self>, track: Track) {
        if let Some(video_id) = track.source_video_id.clone() {
            let _ = db::tracks::set_track_match(&self.db, track.id, &video_id, 1.0).await;
            if self.transition(track.id, TrackStatus::Queued).await.is_some() {
                self.resolver.prefetch(&video_id);
            }
            return;
        }

        if self.transition(track.id, TrackStatus::Matching).await.is_none() {
            return;
        }
        self.resolve_match(&track).await;
    }

    /// Slow path body: the track is already in MATCHING.
    pub(crate) async fn resolve_match(self: &Arc<Self>, track: &Track) {
        let outcome = self.mapper.map_track(&track.title, &track.artist).await;

        match outcome.video_id {
            Some(video_id) => {
                let _ =
                    db::tracks::set_track_match(&self.db, track.id, &video_id, outcome.confidence)
                        .await;
                if outcome.confidence >= CONFIDENCE_THRESHOLD {
                    if self.transition(track.id, TrackStatus::Matched).await.is_some()
                        && self.transition(track.id, TrackStatus::Queued).await.is_some()
                    {
                        self.resolver.prefetch(&video_id);
                    }
                } else {
                    info!(
                        track_id = %track.id,
                        confidence = outcome.confidence,
                        "low-confidence match, awaiting operator"
                    );
                    self.transition(track.id, TrackStatus::MatchedLowConfidence)
                        .await;
                }
            }
            None => {
                let _ = db::tracks::set_track_error(
                    &self.db,
                    track.id,
                    "no match found",
                    track.retry_count,
                )
                .await;
                self.transition(track.id, TrackStatus::Failed).await;
            }
        }
    }

    /// Human decision on a low-confidence (or manual) track.
    pub async fn action(
        self: &Arc<Self>,
        track_id: Uuid,
        action: TrackAction,
        video_id: Option<String>,
    ) -> ActionResponse {
        let track = match db::tracks::get_track(&self.db, track_id).await {
            Ok(Some(track)) => track,
            _ => return ActionResponse::error("track not found"),
        };

        match action {
            TrackAction::Accept => {
                let Some(video_id) = video_id else {
                    return ActionResponse::error("video_id required for accept");
                };
                let _ = db::tracks::set_track_match(&self.db, track_id, &video_id, 1.0).await;
                if self.transition(track_id, TrackStatus::Matched).await.is_none() {
                    return ActionResponse::error("track is not awaiting a decision");
                }
                self.transition(track_id, TrackStatus::Queued).await;
                self.resolver.prefetch(&video_id);
                ActionResponse::ok()
            }
            TrackAction::Rematch => {
                if self.transition(track_id, TrackStatus::Matching).await.is_none() {
                    return ActionResponse::error("track cannot be rematched in its current state");
                }
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    this.resolve_match(&track).await;
                });
                ActionResponse::ok()
            }
            TrackAction::Manual => {
                if self
                    .transition(track_id, TrackStatus::MatchingManual)
                    .await
                    .is_none()
                {
                    return ActionResponse::error("track cannot be handed off in its current state");
                }
                ActionResponse::ok()
            }
        }
    }
}

/// Operator decision kinds accepted by the action gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackAction {
    Accept,
    Rematch,
    Manual,
}

/// Gateway response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}
