//! Watchdog, ramp-up, and crash recovery

use super::{BatchManager, MAX_CONCURRENT};
use crate::db;
use crate::orchestrator::dispatch::cleanup_partial;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tunevault_common::types::TrackStatus;
use uuid::Uuid;

/// A worker silent for this long is presumed dead
pub const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(90);

/// Watchdog sweep cadence
pub const WATCHDOG_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Ramp-up check cadence
pub const RAMP_UP_INTERVAL: Duration = Duration::from_secs(30);

/// A success within this window counts as "running clean"
pub const RAMP_UP_SUCCESS_WINDOW: Duration = Duration::from_secs(60);

impl BatchManager {
    /// Health monitor: requeue tracks whose workers stopped progressing.
    pub async fn run_watchdog(self: Arc<Self>) {
        info!("watchdog started");
        let mut ticker = tokio::time::interval(WATCHDOG_SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            self.watchdog_sweep().await;
        }
    }

    /// One sweep, separated out so recovery tests can drive it directly.
    pub async fn watchdog_sweep(&self) {
        let stale: Vec<Uuid> = self
            .watchdog
            .iter()
            .filter(|entry| entry.value().elapsed() >= WATCHDOG_TIMEOUT)
            .map(|entry| *entry.key())
            .collect();

        for track_id in stale {
            warn!(
                track_id = %track_id,
                timeout_secs = WATCHDOG_TIMEOUT.as_secs(),
                "worker stalled, requeueing track"
            );
            self.transition(track_id, TrackStatus::Queued).await;
            self.watchdog.remove(&track_id);
        }

        // A non-empty worker count with an empty watchdog map means a
        // worker died without running its cleanup path.
        if self.active_workers.load(Ordering::SeqCst) > 0 && self.watchdog.is_empty() {
            error!(
                active_workers = self.active_workers.load(Ordering::SeqCst),
                "invariant breach: active workers with empty watchdog map, resetting counter"
            );
            self.active_workers.store(0, Ordering::SeqCst);
        }
    }

    /// Gradually restore concurrency after a clean-running interval.
    pub async fn run_ramp_up(self: Arc<Self>) {
        info!("ramp-up task started");
        let mut ticker = tokio::time::interval(RAMP_UP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            self.ramp_up_tick();
        }
    }

    /// One ramp-up decision.
    pub fn ramp_up_tick(&self) {
        if self.consecutive_rate_limits.load(Ordering::SeqCst) != 0 {
            return;
        }
        let recent_success = {
            let guard = self.last_success.lock().unwrap();
            matches!(*guard, Some(at) if at.elapsed() < RAMP_UP_SUCCESS_WINDOW)
        };
        if !recent_success {
            return;
        }

        let updated = self
            .current_max_concurrent
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                (v < MAX_CONCURRENT).then_some(v + 1)
            });
        if let Ok(previous) = updated {
            info!(
                max_concurrent = previous + 1,
                "running clean, ramping concurrency up"
            );
        }
    }

    /// Crash recovery pass, run once at engine start.
    ///
    /// Anything a prior process lifetime left in DISPATCHING or DOWNLOADING
    /// is requeued and its on-disk leftovers removed.
    pub async fn recover(self: &Arc<Self>) {
        self.is_recovering.store(true, Ordering::SeqCst);
        let _guard = self.transition_lock.lock().await;

        let stalled = match db::tracks::get_stalled_tracks(&self.db).await {
            Ok(stalled) => stalled,
            Err(e) => {
                warn!(error = %e, "recovery scan failed");
                self.is_recovering.store(false, Ordering::SeqCst);
                return;
            }
        };

        let mut requeued = 0usize;
        for track in &stalled {
            if let Some(path) = &track.output_file_path {
                let final_path = Path::new(path);
                let _ = tokio::fs::remove_file(final_path).await;
                cleanup_partial(final_path).await;
            }
            if self
                .transition_locked(track.id, TrackStatus::Queued)
                .await
                .is_some()
            {
                requeued += 1;
            }
        }

        self.active_workers.store(0, Ordering::SeqCst);
        self.watchdog.clear();
        self.is_recovering.store(false, Ordering::SeqCst);

        if requeued > 0 {
            info!(requeued = requeued, "crash recovery requeued stalled tracks");
        } else {
            info!("crash recovery found nothing to do");
        }
    }
}
