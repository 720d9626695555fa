//! Batch manager state-machine and recovery tests
//!
//! These drive the real manager against a file-backed store but never touch
//! the network: only transitions, derived state, the action gateway, and
//! the recovery pass are exercised.

use std::sync::Arc;
use tempfile::TempDir;
use tunevault_common::config::TomlConfig;
use tunevault_common::types::{BatchState, SourcePlatform, TrackStatus};
use tunevault_engine::db;
use tunevault_engine::extractor::TrackCandidate;
use tunevault_engine::models::{Batch, Track};
use tunevault_engine::orchestrator::{BatchManager, TrackAction, MAX_CONCURRENT, MIN_CONCURRENT};
use tunevault_engine::AppState;

struct Harness {
    _dir: TempDir,
    state: AppState,
}

impl Harness {
    fn manager(&self) -> &Arc<BatchManager> {
        &self.state.manager
    }
}

async fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let pool = db::init_pool(&dir.path().join("engine.db")).await.unwrap();
    let music_dir = dir.path().join("Music");
    std::fs::create_dir_all(&music_dir).unwrap();
    // Point the platform at a dead local port so stray prefetches fail
    // fast instead of reaching out to a real instance.
    let config = TomlConfig {
        api_instance: Some("http://127.0.0.1:9".to_string()),
        mirror_instances: Some(Vec::new()),
        ..Default::default()
    };
    let state = AppState::new(pool, &config, music_dir);
    Harness { _dir: dir, state }
}

fn candidate(title: &str) -> TrackCandidate {
    TrackCandidate {
        title: title.to_string(),
        artist: "Artist".to_string(),
        duration_seconds: Some(180),
        thumbnail_url: None,
        source_video_id: None,
    }
}

async fn seed_tracks(state: &AppState, titles: &[&str]) -> (Batch, Vec<Track>) {
    let batch = Batch::new("https://example.com/playlist/t", SourcePlatform::Catalog);
    db::batches::insert_batch(&state.db, &batch).await.unwrap();

    let tracks: Vec<Track> = titles
        .iter()
        .map(|t| Track::from_candidate(batch.id, SourcePlatform::Catalog, &candidate(t)))
        .collect();
    db::tracks::insert_tracks_bulk(&state.db, &tracks).await.unwrap();
    db::batches::set_batch_total(&state.db, batch.id, tracks.len() as i64)
        .await
        .unwrap();

    (batch, tracks)
}

#[tokio::test]
async fn legal_transition_persists() {
    let h = harness().await;
    let (_, tracks) = seed_tracks(&h.state, &["A"]).await;
    let id = tracks[0].id;

    let updated = h.manager().transition(id, TrackStatus::Queued).await;
    assert_eq!(updated.unwrap().status, TrackStatus::Queued);

    let stored = db::tracks::get_track(&h.state.db, id).await.unwrap().unwrap();
    assert_eq!(stored.status, TrackStatus::Queued);
}

#[tokio::test]
async fn illegal_transition_is_a_silent_noop() {
    let h = harness().await;
    let (_, tracks) = seed_tracks(&h.state, &["A"]).await;
    let id = tracks[0].id;

    // EXTRACTED -> DOWNLOADING is not in the table.
    assert!(h
        .manager()
        .transition(id, TrackStatus::Downloading)
        .await
        .is_none());

    let stored = db::tracks::get_track(&h.state.db, id).await.unwrap().unwrap();
    assert_eq!(stored.status, TrackStatus::Extracted);

    // Terminal state stays terminal.
    for step in [
        TrackStatus::Queued,
        TrackStatus::Dispatching,
        TrackStatus::Downloading,
        TrackStatus::Completed,
    ] {
        h.manager().transition(id, step).await;
    }
    assert!(h
        .manager()
        .transition(id, TrackStatus::Queued)
        .await
        .is_none());
    let stored = db::tracks::get_track(&h.state.db, id).await.unwrap().unwrap();
    assert_eq!(stored.status, TrackStatus::Completed);
}

#[tokio::test]
async fn requeue_resets_byte_counters() {
    let h = harness().await;
    let (_, tracks) = seed_tracks(&h.state, &["A"]).await;
    let id = tracks[0].id;

    for step in [
        TrackStatus::Queued,
        TrackStatus::Dispatching,
        TrackStatus::Downloading,
    ] {
        h.manager().transition(id, step).await.unwrap();
    }
    db::tracks::set_track_progress(&h.state.db, id, 5000, 10000)
        .await
        .unwrap();

    h.manager().transition(id, TrackStatus::Queued).await.unwrap();

    let stored = db::tracks::get_track(&h.state.db, id).await.unwrap().unwrap();
    assert_eq!(stored.bytes_downloaded, 0);
    assert_eq!(stored.total_bytes, 0);
}

#[tokio::test]
async fn batch_state_follows_track_multiset() {
    let h = harness().await;
    let (batch, tracks) = seed_tracks(&h.state, &["A", "B", "C"]).await;

    // One track completes, the rest stay queued: batch keeps downloading.
    for track in &tracks {
        h.manager().transition(track.id, TrackStatus::Queued).await;
    }
    for step in [
        TrackStatus::Dispatching,
        TrackStatus::Downloading,
        TrackStatus::Completed,
    ] {
        h.manager().transition(tracks[0].id, step).await;
    }

    let stored = db::batches::get_batch(&h.state.db, batch.id).await.unwrap().unwrap();
    assert_eq!(stored.state, BatchState::Downloading);
    assert_eq!(stored.completed_count, 1);
    assert_eq!(stored.failed_count, 0);

    // Everything terminal: batch completes.
    for track in &tracks[1..] {
        for step in [
            TrackStatus::Dispatching,
            TrackStatus::Downloading,
            TrackStatus::Completed,
        ] {
            h.manager().transition(track.id, step).await;
        }
    }
    let stored = db::batches::get_batch(&h.state.db, batch.id).await.unwrap().unwrap();
    assert_eq!(stored.state, BatchState::Completed);
    assert_eq!(stored.completed_count, 3);
}

#[tokio::test]
async fn low_confidence_parks_batch_for_the_operator() {
    let h = harness().await;
    let (batch, tracks) = seed_tracks(&h.state, &["A", "B"]).await;

    // A completes, B lands in low confidence.
    for step in [
        TrackStatus::Queued,
        TrackStatus::Dispatching,
        TrackStatus::Downloading,
        TrackStatus::Completed,
    ] {
        h.manager().transition(tracks[0].id, step).await;
    }
    h.manager()
        .transition(tracks[1].id, TrackStatus::Matching)
        .await
        .unwrap();
    h.manager()
        .transition(tracks[1].id, TrackStatus::MatchedLowConfidence)
        .await
        .unwrap();

    let stored = db::batches::get_batch(&h.state.db, batch.id).await.unwrap().unwrap();
    assert_eq!(stored.state, BatchState::AwaitingUser);
}

#[tokio::test]
async fn accept_action_routes_track_back_to_queue() {
    let h = harness().await;
    let (_, tracks) = seed_tracks(&h.state, &["A"]).await;
    let id = tracks[0].id;

    h.manager().transition(id, TrackStatus::Matching).await.unwrap();
    h.manager()
        .transition(id, TrackStatus::MatchedLowConfidence)
        .await
        .unwrap();

    let response = h
        .manager()
        .action(id, TrackAction::Accept, Some("vid42".to_string()))
        .await;
    assert!(response.success, "{:?}", response.error);

    let stored = db::tracks::get_track(&h.state.db, id).await.unwrap().unwrap();
    assert_eq!(stored.status, TrackStatus::Queued);
    assert_eq!(stored.source_video_id.as_deref(), Some("vid42"));
    assert_eq!(stored.match_confidence, Some(1.0));
}

#[tokio::test]
async fn accept_without_video_id_is_rejected() {
    let h = harness().await;
    let (_, tracks) = seed_tracks(&h.state, &["A"]).await;
    let id = tracks[0].id;

    h.manager().transition(id, TrackStatus::Matching).await.unwrap();
    h.manager()
        .transition(id, TrackStatus::MatchedLowConfidence)
        .await
        .unwrap();

    let response = h.manager().action(id, TrackAction::Accept, None).await;
    assert!(!response.success);

    // Row untouched.
    let stored = db::tracks::get_track(&h.state.db, id).await.unwrap().unwrap();
    assert_eq!(stored.status, TrackStatus::MatchedLowConfidence);
}

#[tokio::test]
async fn manual_action_parks_track() {
    let h = harness().await;
    let (_, tracks) = seed_tracks(&h.state, &["A"]).await;
    let id = tracks[0].id;

    h.manager().transition(id, TrackStatus::Matching).await.unwrap();
    h.manager()
        .transition(id, TrackStatus::MatchedLowConfidence)
        .await
        .unwrap();

    let response = h.manager().action(id, TrackAction::Manual, None).await;
    assert!(response.success);

    let stored = db::tracks::get_track(&h.state.db, id).await.unwrap().unwrap();
    assert_eq!(stored.status, TrackStatus::MatchingManual);

    // Accept works from the manual state too.
    let response = h
        .manager()
        .action(id, TrackAction::Accept, Some("vid7".to_string()))
        .await;
    assert!(response.success);
}

#[tokio::test]
async fn action_on_unknown_track_fails_cleanly() {
    let h = harness().await;
    let response = h
        .manager()
        .action(uuid::Uuid::new_v4(), TrackAction::Manual, None)
        .await;
    assert!(!response.success);
}

#[tokio::test]
async fn recovery_requeues_stalled_tracks_and_removes_artifacts() {
    let h = harness().await;
    let (_, tracks) = seed_tracks(&h.state, &["A", "B", "C"]).await;

    // A mid-download, B mid-dispatch, C completed in a "previous life".
    for (track, steps) in [
        (
            &tracks[0],
            &[
                TrackStatus::Queued,
                TrackStatus::Dispatching,
                TrackStatus::Downloading,
            ][..],
        ),
        (&tracks[1], &[TrackStatus::Queued, TrackStatus::Dispatching][..]),
        (
            &tracks[2],
            &[
                TrackStatus::Queued,
                TrackStatus::Dispatching,
                TrackStatus::Downloading,
                TrackStatus::Completed,
            ][..],
        ),
    ] {
        for step in steps {
            h.manager().transition(track.id, *step).await.unwrap();
        }
    }

    // Leave download leftovers for track A.
    let final_path = h.state.music_dir.join("A.opus");
    let tmp_path = h.state.music_dir.join("A.opus.tmp");
    let seg_path = h.state.music_dir.join("A.opus.tmp.seg0");
    std::fs::write(&final_path, b"partial").unwrap();
    std::fs::write(&tmp_path, b"partial").unwrap();
    std::fs::write(&seg_path, b"seg").unwrap();
    db::tracks::set_track_output_path(&h.state.db, tracks[0].id, &final_path.to_string_lossy())
        .await
        .unwrap();

    h.manager().recover().await;

    for id in [tracks[0].id, tracks[1].id] {
        let stored = db::tracks::get_track(&h.state.db, id).await.unwrap().unwrap();
        assert_eq!(stored.status, TrackStatus::Queued);
        assert_eq!(stored.bytes_downloaded, 0);
    }
    // Completed rows are untouched.
    let done = db::tracks::get_track(&h.state.db, tracks[2].id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, TrackStatus::Completed);

    assert!(!final_path.exists());
    assert!(!tmp_path.exists());
    assert!(!seg_path.exists());
    assert_eq!(h.manager().active_workers(), 0);
}

#[tokio::test]
async fn concurrency_governor_stays_in_bounds() {
    let h = harness().await;
    let manager = h.manager();

    assert_eq!(manager.current_max_concurrent(), MAX_CONCURRENT);
    assert!(MIN_CONCURRENT <= manager.current_max_concurrent());

    // Ramp tick without a recent success must not push past the ceiling.
    manager.ramp_up_tick();
    assert_eq!(manager.current_max_concurrent(), MAX_CONCURRENT);
}
