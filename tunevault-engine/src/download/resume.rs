//! Resumable single-stream download
//!
//! The on-demand path keeps a partial `.tmp` and continues it across
//! network drops with `Range: bytes=N-`. Expired URLs (416) are refreshed
//! through the resolver and the attempt restarts from zero. The caller owns
//! the final rename, so a crash at any point leaves only the `.tmp`.

use super::segmented::READ_BUF;
use super::DownloadError;
use crate::resolver::StreamResolver;
use reqwest::header;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

/// Attempt budget across the whole download
pub const RESUME_MAX_RETRIES: u32 = 15;

/// Backoff schedule: 2, 4, 8, 16, then capped at 30 seconds
pub const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(2);
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Events surfaced to the task registry during a resumable download
#[derive(Debug, Clone, Copy)]
pub enum ResumeEvent {
    /// Progress bucketed into [5, 99]; 100 is the caller's rename
    Progress { percent: u8 },
    /// Waiting out a network failure before the next attempt
    Paused { retry_in: Duration },
}

pub type ResumeEventFn = Arc<dyn Fn(ResumeEvent) + Send + Sync>;

/// Backoff delay for the given 1-based retry number.
pub fn retry_delay(retry: u32) -> Duration {
    let exp = retry.saturating_sub(1).min(4);
    MAX_RETRY_DELAY.min(INITIAL_RETRY_DELAY * 2u32.pow(exp))
}

/// Bucket byte progress into [5, 99].
pub fn bucket_percent(written: u64, total: u64) -> u8 {
    if total == 0 {
        return 5;
    }
    let ratio = (written.saturating_mul(94) / total).min(94) as u8;
    (5 + ratio).min(99)
}

fn tmp_path(final_path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.tmp", final_path.display()))
}

/// Download `initial_url` into `<final_path>.tmp`, resuming the partial if
/// one exists. Returns the byte count on completion; the `.tmp` is left in
/// place for the caller to rename.
pub async fn fetch_resumable(
    http: &reqwest::Client,
    resolver: &Arc<StreamResolver>,
    source_id: &str,
    initial_url: String,
    final_path: &Path,
    events: ResumeEventFn,
) -> Result<u64, DownloadError> {
    let tmp = tmp_path(final_path);
    let mut url = initial_url;
    let mut retry: u32 = 0;

    'attempt: loop {
        let offset = tokio::fs::metadata(&tmp).await.map(|m| m.len()).unwrap_or(0);

        let mut request = http.get(&url);
        if offset > 0 {
            debug!(offset = offset, "resuming partial download");
            request = request.header(header::RANGE, format!("bytes={offset}-"));
        }

        let mut response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "request failed, backing off");
                retry += 1;
                backoff(retry, &events).await?;
                continue 'attempt;
            }
        };

        let status = response.status().as_u16();
        let (mut out, mut written, total) = match status {
            // Append from the current length
            206 => {
                let total = content_range_total(&response)
                    .or_else(|| response.content_length().map(|len| offset + len))
                    .unwrap_or(0);
                let file = OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(&tmp)
                    .await?;
                (BufWriter::with_capacity(READ_BUF, file), offset, total)
            }
            // Server ignored the range: restart from zero
            200 => {
                if offset > 0 {
                    debug!("server ignored range header, restarting from byte 0");
                }
                let total = response.content_length().unwrap_or(0);
                let file = File::create(&tmp).await?;
                (BufWriter::with_capacity(READ_BUF, file), 0u64, total)
            }
            // Stream URL expired: refresh through the resolver, restart
            416 => {
                debug!(source_id = %source_id, "range not satisfiable, refreshing stream URL");
                resolver.invalidate(source_id);
                let Some(fresh) = resolver.resolve(source_id).await else {
                    return Err(DownloadError::Failed(
                        "stream refresh after 416 failed".to_string(),
                    ));
                };
                url = fresh;
                let _ = tokio::fs::remove_file(&tmp).await;
                continue 'attempt;
            }
            other => return Err(DownloadError::from_status(other)),
        };

        // Stream body; a mid-stream error is a network failure, not fatal.
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    out.write_all(&chunk).await?;
                    written += chunk.len() as u64;
                    (events.as_ref())(ResumeEvent::Progress {
                        percent: bucket_percent(written, total),
                    });
                }
                Ok(None) => break,
                Err(e) => {
                    out.flush().await?;
                    warn!(error = %e, written = written, "stream interrupted, backing off");
                    retry += 1;
                    backoff(retry, &events).await?;
                    continue 'attempt;
                }
            }
        }
        out.flush().await?;

        if total > 0 && written < total {
            warn!(
                written = written,
                total = total,
                "truncated response, backing off"
            );
            retry += 1;
            backoff(retry, &events).await?;
            continue 'attempt;
        }

        return Ok(written);
    }
}

async fn backoff(retry: u32, events: &ResumeEventFn) -> Result<(), DownloadError> {
    if retry > RESUME_MAX_RETRIES {
        return Err(DownloadError::Failed(format!(
            "giving up after {RESUME_MAX_RETRIES} attempts"
        )));
    }
    let delay = retry_delay(retry);
    (events.as_ref())(ResumeEvent::Paused { retry_in: delay });
    tokio::time::sleep(delay).await;
    Ok(())
}

/// Total length out of a `Content-Range: bytes N-M/total` header.
fn content_range_total(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.rsplit('/').next())
        .and_then(|total| total.parse().ok())
}
