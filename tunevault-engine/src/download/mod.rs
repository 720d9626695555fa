//! Download primitives: segmented parallel fetch and resumable single fetch

pub mod resume;
pub mod segmented;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Progress callbacks fire at most this often
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(300);

/// Download failure kinds. Rate limiting is distinguishable because the
/// orchestrator's back-pressure policy keys off it.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("rate limited by host (HTTP {0})")]
    RateLimited(u16),

    #[error("download failed: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl DownloadError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, DownloadError::RateLimited(_))
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16) -> Self {
        match status {
            429 | 403 => DownloadError::RateLimited(status),
            other => DownloadError::Failed(format!("unexpected HTTP status {other}")),
        }
    }
}

/// One throttled progress report
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    pub total_bytes: u64,
    pub bytes_downloaded: u64,
    /// Average over the whole attempt, not instantaneous
    pub bytes_per_sec: f64,
}

pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;

/// Shared byte counter that forwards throttled reports to a callback.
/// Cloned across segment tasks; the emission window is process-time based.
pub(crate) struct ProgressThrottle {
    total_bytes: u64,
    downloaded: AtomicU64,
    started: Instant,
    last_emit: StdMutex<Instant>,
    callback: ProgressFn,
}

impl ProgressThrottle {
    pub(crate) fn new(total_bytes: u64, callback: ProgressFn) -> Arc<Self> {
        let now = Instant::now();
        Arc::new(Self {
            total_bytes,
            downloaded: AtomicU64::new(0),
            started: now,
            // Backdate so the first chunk reports immediately.
            last_emit: StdMutex::new(now.checked_sub(PROGRESS_INTERVAL).unwrap_or(now)),
            callback,
        })
    }

    /// Record freshly received bytes, emitting if the window elapsed.
    pub(crate) fn record(&self, bytes: u64) {
        let downloaded = self.downloaded.fetch_add(bytes, Ordering::Relaxed) + bytes;

        let mut last = self.last_emit.lock().unwrap();
        if last.elapsed() < PROGRESS_INTERVAL {
            return;
        }
        *last = Instant::now();
        drop(last);

        self.emit(downloaded);
    }

    /// Unthrottled final report.
    pub(crate) fn finish(&self) {
        self.emit(self.downloaded.load(Ordering::Relaxed));
    }

    fn emit(&self, downloaded: u64) {
        let elapsed = self.started.elapsed().as_secs_f64().max(0.001);
        (self.callback.as_ref())(Progress {
            total_bytes: self.total_bytes,
            bytes_downloaded: downloaded,
            bytes_per_sec: downloaded as f64 / elapsed,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn rate_limit_classification() {
        assert!(DownloadError::from_status(429).is_rate_limited());
        assert!(DownloadError::from_status(403).is_rate_limited());
        assert!(!DownloadError::from_status(500).is_rate_limited());
        assert!(!DownloadError::Failed("x".into()).is_rate_limited());
    }

    #[test]
    fn throttle_suppresses_rapid_reports() {
        let emitted = Arc::new(AtomicUsize::new(0));
        let counter = emitted.clone();
        let throttle = ProgressThrottle::new(
            1000,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        // First record emits (backdated window), the rest land inside it.
        for _ in 0..50 {
            throttle.record(10);
        }
        assert_eq!(emitted.load(Ordering::SeqCst), 1);

        throttle.finish();
        assert_eq!(emitted.load(Ordering::SeqCst), 2);
    }
}
