//! Stream resolver: source id -> short-lived direct audio URL
//!
//! Direct URLs expire, so results live in a TTL cache. Concurrent
//! resolutions of the same id share one in-flight future; prefetch is the
//! same machinery without a waiter. Resolution walks the primary instance
//! first and then each mirror in order, picking the audio stream with the
//! highest bitrate (first video stream as a last resort).

use crate::platform::{PlatformClient, StreamsResponse};
use dashmap::DashMap;
use futures::future::{FutureExt, Shared};
use futures::Future;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Cached direct URLs are trusted for one hour
pub const STREAM_CACHE_TTL: Duration = Duration::from_secs(3600);

/// How long a caller waits on someone else's in-flight resolution
pub const PENDING_WAIT: Duration = Duration::from_secs(30);

/// Error string surfaced when every instance failed
pub const ALL_METHODS_FAILED: &str = "all extraction methods failed";

type ResolveFuture = Shared<Pin<Box<dyn Future<Output = Option<String>> + Send>>>;

struct CachedStream {
    url: String,
    fetched_at: Instant,
}

pub struct StreamResolver {
    platform: Arc<PlatformClient>,
    /// Primary instance first, then mirrors in fallback order
    instances: Vec<String>,
    cache: DashMap<String, CachedStream>,
    pending: StdMutex<HashMap<String, ResolveFuture>>,
}

impl StreamResolver {
    pub fn new(platform: Arc<PlatformClient>, mirror_instances: Vec<String>) -> Self {
        let mut instances = vec![platform.instance().to_string()];
        instances.extend(mirror_instances);

        Self {
            platform,
            instances,
            cache: DashMap::new(),
            pending: StdMutex::new(HashMap::new()),
        }
    }

    /// Resolve a source id to a direct stream URL.
    ///
    /// Returns `None` when every extraction method failed or an in-flight
    /// resolution did not finish within [`PENDING_WAIT`].
    pub async fn resolve(self: &Arc<Self>, source_id: &str) -> Option<String> {
        if let Some(url) = self.cached(source_id) {
            return Some(url);
        }

        let fut = self.pending_or_start(source_id);
        match tokio::time::timeout(PENDING_WAIT, fut).await {
            Ok(result) => result,
            Err(_) => {
                debug!(source_id = %source_id, "timed out waiting on pending resolution");
                None
            }
        }
    }

    /// Fire-and-forget warm-up of the cache. Idempotent: a fresh cache
    /// entry or an in-flight resolution means no new work.
    pub fn prefetch(self: &Arc<Self>, source_id: &str) {
        if self.is_cached(source_id) {
            return;
        }
        // pending_or_start spawns the driver task, which is all a prefetch
        // needs; dropping the handle does not cancel the shared future.
        let _ = self.pending_or_start(source_id);
    }

    /// Whether a non-expired cache entry exists.
    pub fn is_cached(&self, source_id: &str) -> bool {
        self.cached(source_id).is_some()
    }

    /// Drop a cached URL, forcing the next resolve to re-extract. Used when
    /// the host rejects the URL (416 / explicit invalidation).
    pub fn invalidate(&self, source_id: &str) {
        self.cache.remove(source_id);
    }

    fn cached(&self, source_id: &str) -> Option<String> {
        if let Some(entry) = self.cache.get(source_id) {
            if entry.fetched_at.elapsed() < STREAM_CACHE_TTL {
                return Some(entry.url.clone());
            }
        }
        // Expired entries are removed lazily.
        self.cache
            .remove_if(source_id, |_, v| v.fetched_at.elapsed() >= STREAM_CACHE_TTL);
        None
    }

    /// Existing in-flight future for the id, or a freshly started one.
    fn pending_or_start(self: &Arc<Self>, source_id: &str) -> ResolveFuture {
        let mut pending = self.pending.lock().unwrap();
        if let Some(fut) = pending.get(source_id) {
            return fut.clone();
        }

        let this = Arc::clone(self);
        let key = source_id.to_string();
        let fut: ResolveFuture = async move {
            let result = this.fresh_resolve(&key).await;
            if let Some(url) = &result {
                this.cache.insert(
                    key.clone(),
                    CachedStream {
                        url: url.clone(),
                        fetched_at: Instant::now(),
                    },
                );
            }
            this.pending.lock().unwrap().remove(&key);
            result
        }
        .boxed()
        .shared();

        pending.insert(source_id.to_string(), fut.clone());
        // Drive the future to completion independently of any waiter, so a
        // timed-out or dropped caller cannot stall other waiters.
        tokio::spawn(fut.clone().map(|_| ()));
        fut
    }

    /// Walk the instance list in order; first usable stream wins.
    async fn fresh_resolve(&self, source_id: &str) -> Option<String> {
        for instance in &self.instances {
            match self.platform.streams_from(instance, source_id).await {
                Ok(streams) => {
                    if let Some(url) = pick_stream(&streams) {
                        debug!(source_id = %source_id, instance = %instance, "stream resolved");
                        return Some(url);
                    }
                    debug!(
                        source_id = %source_id,
                        instance = %instance,
                        "instance returned no usable streams"
                    );
                }
                Err(e) => {
                    debug!(
                        source_id = %source_id,
                        instance = %instance,
                        error = %e,
                        "stream extraction failed, trying next instance"
                    );
                }
            }
        }

        warn!(source_id = %source_id, "{ALL_METHODS_FAILED}");
        None
    }
}

/// Audio stream with the highest bitrate, else the first video stream.
pub fn pick_stream(streams: &StreamsResponse) -> Option<String> {
    streams
        .audio_streams
        .iter()
        .max_by_key(|s| s.bitrate)
        .map(|s| s.url.clone())
        .or_else(|| streams.video_streams.first().map(|s| s.url.clone()))
}

/// Map a stream URL's advertised mime type to the stored codec extension.
///
/// The engine stores whatever codec the stream natively provides; only the
/// container label differs.
pub fn codec_ext_for_url(url: &str) -> &'static str {
    let lower = url.to_lowercase();
    if lower.contains("audio%2fwebm") || lower.contains("audio/webm") {
        "opus"
    } else if lower.contains("audio%2fogg") || lower.contains("audio/ogg") {
        "ogg"
    } else {
        "mp3"
    }
}
