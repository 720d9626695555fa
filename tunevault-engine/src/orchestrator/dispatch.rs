//! Dispatch loop and download workers

use super::{BatchManager, MAX_CONCURRENT, MIN_CONCURRENT};
use crate::db;
use crate::download::segmented;
use crate::download::{DownloadError, Progress, ProgressFn};
use crate::models::{Track, MAX_RETRIES};
use crate::resolver::{codec_ext_for_url, ALL_METHODS_FAILED};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tunevault_common::events::EngineEvent;
use tunevault_common::fingerprint::sanitize_filename;
use tunevault_common::types::TrackStatus;

/// Pause between dispatches, spacing out requests to the stream host
pub const REQUEST_SPACING: Duration = Duration::from_millis(250);

/// How many upcoming queue entries get a stream prefetch per dispatch
pub const PREFETCH_LOOKAHEAD: usize = 5;

/// Sleep while the global rate-limit cooldown is active
const COOLDOWN_POLL: Duration = Duration::from_secs(5);

/// Sleep while the worker pool is saturated or recovery is running
const SATURATED_POLL: Duration = Duration::from_millis(500);

/// Sleep when the queue is empty
const IDLE_POLL: Duration = Duration::from_secs(1);

impl BatchManager {
    /// The single long-running dispatch task.
    pub async fn run_dispatch_loop(self: Arc<Self>) {
        info!("dispatch loop started");

        loop {
            if self.in_cooldown() {
                tokio::time::sleep(COOLDOWN_POLL).await;
                continue;
            }

            if self.active_workers.load(Ordering::SeqCst)
                >= self.current_max_concurrent.load(Ordering::SeqCst)
                || self.is_recovering.load(Ordering::SeqCst)
            {
                tokio::time::sleep(SATURATED_POLL).await;
                continue;
            }

            let Some((track, upcoming)) = self.claim_next_queued().await else {
                tokio::time::sleep(IDLE_POLL).await;
                continue;
            };

            self.active_workers.fetch_add(1, Ordering::SeqCst);
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                this.run_worker(track).await;
            });

            // Warm the resolver cache for what comes next.
            for next in &upcoming {
                if let Some(video_id) = &next.source_video_id {
                    self.resolver.prefetch(video_id);
                }
            }

            tokio::time::sleep(REQUEST_SPACING).await;
        }
    }

    /// Whether the global cooldown window is still open.
    pub(crate) fn in_cooldown(&self) -> bool {
        let guard = self.rate_limit_until.lock().unwrap();
        matches!(*guard, Some(until) if Instant::now() < until)
    }

    /// Pop the FIFO head of the queue and claim it, atomically under the
    /// transition mutex. Also returns the next few entries for prefetch.
    async fn claim_next_queued(&self) -> Option<(Track, Vec<Track>)> {
        let _guard = self.transition_lock.lock().await;

        let queued = match db::tracks::get_queued_tracks(&self.db).await {
            Ok(queued) => queued,
            Err(e) => {
                warn!(error = %e, "failed to read queue");
                return None;
            }
        };
        let head = queued.first()?;
        let claimed = self
            .transition_locked(head.id, TrackStatus::Dispatching)
            .await?;
        let upcoming = queued
            .iter()
            .skip(1)
            .take(PREFETCH_LOOKAHEAD)
            .cloned()
            .collect();

        Some((claimed, upcoming))
    }

    /// One download worker, spawned per claimed track.
    async fn run_worker(self: Arc<Self>, track: Track) {
        let track_id = track.id;

        let outcome = match self.transition(track_id, TrackStatus::Downloading).await {
            Some(track) => {
                debug!(track_id = %track_id, title = %track.title, "worker started");
                let result = self.execute_download(&track).await;
                Some((track, result))
            }
            // Claim evaporated between dispatch and start; nothing to do.
            None => None,
        };

        if let Some((track, result)) = outcome {
            match result {
                Ok(final_path) => self.finish_success(&track, &final_path).await,
                Err(error) => self.handle_worker_failure(&track, error).await,
            }
        }

        // The watchdog may have force-reset the counter mid-flight.
        let _ = self
            .active_workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1));
        self.watchdog.remove(&track_id);
    }

    /// Resolve, fetch into a `.tmp`, and rename. The rename is the commit
    /// point; the caller decides whether the row transition still applies.
    async fn execute_download(self: &Arc<Self>, track: &Track) -> Result<PathBuf, DownloadError> {
        let video_id = track
            .source_video_id
            .clone()
            .ok_or_else(|| DownloadError::Failed("missing source video id".to_string()))?;

        let url = self
            .resolver
            .resolve(&video_id)
            .await
            .ok_or_else(|| DownloadError::Failed(ALL_METHODS_FAILED.to_string()))?;

        let ext = codec_ext_for_url(&url);
        let final_path = self
            .music_dir
            .join(format!("{}.{}", sanitize_filename(&track.title), ext));
        let _ = db::tracks::set_track_output_path(
            &self.db,
            track.id,
            &final_path.to_string_lossy(),
        )
        .await;

        let tmp = PathBuf::from(format!("{}.tmp", final_path.display()));
        self.watchdog.insert(track.id, Instant::now());

        let progress = self.progress_forwarder(track);
        segmented::fetch(&self.http, &url, &tmp, progress).await?;

        tokio::fs::rename(&tmp, &final_path).await?;
        Ok(final_path)
    }

    /// Throttled progress events go three places: the track row, the
    /// watchdog map, and the event bus.
    fn progress_forwarder(self: &Arc<Self>, track: &Track) -> ProgressFn {
        let this = Arc::clone(self);
        let track_id = track.id;

        Arc::new(move |p: Progress| {
            this.watchdog.insert(track_id, Instant::now());

            this.events.emit(EngineEvent::TrackProgress {
                track_id,
                bytes_downloaded: p.bytes_downloaded as i64,
                total_bytes: p.total_bytes as i64,
                bytes_per_sec: p.bytes_per_sec,
                timestamp: Utc::now(),
            });

            let db = this.db.clone();
            tokio::spawn(async move {
                let _ = db::tracks::set_track_progress(
                    &db,
                    track_id,
                    p.bytes_downloaded as i64,
                    p.total_bytes as i64,
                )
                .await;
            });
        })
    }

    /// Commit the finished download. The transition is the source of truth:
    /// when the watchdog requeued the row mid-flight the transition no-ops
    /// and the worker abandons its result.
    async fn finish_success(self: &Arc<Self>, track: &Track, final_path: &Path) {
        if self
            .transition(track.id, TrackStatus::Completed)
            .await
            .is_none()
        {
            warn!(
                track_id = %track.id,
                "state changed under worker, abandoning completed download"
            );
            let _ = tokio::fs::remove_file(final_path).await;
            return;
        }

        let size = tokio::fs::metadata(final_path)
            .await
            .map(|m| m.len() as i64)
            .unwrap_or(0);
        let _ = db::tracks::set_track_progress(&self.db, track.id, size, size).await;

        self.consecutive_rate_limits.store(0, Ordering::SeqCst);
        *self.last_success.lock().unwrap() = Some(Instant::now());

        // Each clean success claws back one unit of concurrency.
        let _ = self
            .current_max_concurrent
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                (v < MAX_CONCURRENT).then_some(v + 1)
            });

        info!(
            track_id = %track.id,
            title = %track.title,
            bytes = size,
            path = %final_path.display(),
            "track completed"
        );
    }

    /// Failure policy: rate limits feed the governor, everything retries
    /// until the budget runs out.
    async fn handle_worker_failure(self: &Arc<Self>, track: &Track, error: DownloadError) {
        warn!(track_id = %track.id, error = %error, "worker failed");

        if error.is_rate_limited() {
            let streak = self.consecutive_rate_limits.fetch_add(1, Ordering::SeqCst) + 1;
            let _ = self
                .current_max_concurrent
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                    Some((v / 2).max(MIN_CONCURRENT))
                });
            let cooldown = cooldown_for_streak(streak);
            *self.rate_limit_until.lock().unwrap() = Some(Instant::now() + cooldown);

            warn!(
                streak = streak,
                cooldown_secs = cooldown.as_secs(),
                max_concurrent = self.current_max_concurrent.load(Ordering::SeqCst),
                "rate limited, throttling dispatch"
            );
        }

        // Partial artifacts from this attempt are useless to the next one.
        // The output path was assigned after our snapshot, so re-read it.
        let current = db::tracks::get_track(&self.db, track.id).await.ok().flatten();
        if let Some(path) = current.as_ref().and_then(|t| t.output_file_path.as_deref()) {
            cleanup_partial(Path::new(path)).await;
        }

        let retries = track.retry_count + 1;
        let _ = db::tracks::set_track_error(&self.db, track.id, &error.to_string(), retries).await;

        if retries < MAX_RETRIES {
            self.transition(track.id, TrackStatus::Queued).await;
        } else {
            info!(track_id = %track.id, retries = retries, "retry budget exhausted");
            self.transition(track.id, TrackStatus::Failed).await;
        }
    }
}

/// Cooldown grows with the rate-limit streak: 15 s, then 30 s, then 60 s.
pub fn cooldown_for_streak(streak: u32) -> Duration {
    match streak {
        0 | 1 => Duration::from_secs(15),
        2 | 3 => Duration::from_secs(30),
        _ => Duration::from_secs(60),
    }
}

/// Remove the `.tmp` and `.seg*` siblings of a final path.
pub(crate) async fn cleanup_partial(final_path: &Path) {
    let tmp = PathBuf::from(format!("{}.tmp", final_path.display()));
    segmented::remove_segments(&tmp).await;
    segmented::remove_segments(final_path).await;
    let _ = tokio::fs::remove_file(&tmp).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_schedule() {
        assert_eq!(cooldown_for_streak(1), Duration::from_secs(15));
        assert_eq!(cooldown_for_streak(2), Duration::from_secs(30));
        assert_eq!(cooldown_for_streak(3), Duration::from_secs(30));
        assert_eq!(cooldown_for_streak(4), Duration::from_secs(60));
        assert_eq!(cooldown_for_streak(12), Duration::from_secs(60));
    }
}
