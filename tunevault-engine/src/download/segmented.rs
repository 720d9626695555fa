//! Segmented parallel HTTP fetch
//!
//! Probes the server with HEAD; when byte ranges are supported and the file
//! is big enough to be worth it, four ranges download concurrently into
//! `.seg{i}` siblings and merge in index order. Everything else streams
//! through a single GET. Either way the caller gets throttled progress.

use super::{DownloadError, ProgressFn, ProgressThrottle};
use futures::future::try_join_all;
use reqwest::header;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

/// Number of parallel byte ranges
pub const N_SEGMENTS: u64 = 4;

/// Segmentation is only worth it above this per-segment size
pub const MIN_SEG_SIZE: u64 = 256 * 1024;

/// Write buffer size
pub const READ_BUF: usize = 256 * 1024;

/// What the HEAD probe learned about the URL
#[derive(Debug, Clone, Copy)]
pub struct Probe {
    pub content_length: Option<u64>,
    pub accepts_ranges: bool,
}

/// Fetch `url` into `dest`, segmenting when the server allows it.
pub async fn fetch(
    http: &reqwest::Client,
    url: &str,
    dest: &Path,
    progress: ProgressFn,
) -> Result<(), DownloadError> {
    let probe = probe(http, url).await?;

    match probe.content_length {
        Some(len) if probe.accepts_ranges && len > MIN_SEG_SIZE * N_SEGMENTS => {
            debug!(
                len = len,
                segments = N_SEGMENTS,
                dest = %dest.display(),
                "segmented download"
            );
            fetch_segmented(http, url, dest, len, progress).await
        }
        _ => {
            debug!(dest = %dest.display(), "single-stream download");
            fetch_single(http, url, dest, probe.content_length, progress).await
        }
    }
}

/// HEAD probe for length and range support.
pub async fn probe(http: &reqwest::Client, url: &str) -> Result<Probe, DownloadError> {
    let response = http.head(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::from_status(status.as_u16()));
    }

    let content_length = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let accepts_ranges = response
        .headers()
        .get(header::ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .map(|v| !v.eq_ignore_ascii_case("none"))
        .unwrap_or(false);

    Ok(Probe {
        content_length,
        accepts_ranges,
    })
}

/// Contiguous inclusive byte ranges; the last range absorbs the remainder.
pub fn segment_ranges(content_length: u64, segments: u64) -> Vec<(u64, u64)> {
    let base = content_length / segments;
    (0..segments)
        .map(|i| {
            let start = i * base;
            let end = if i == segments - 1 {
                content_length - 1
            } else {
                (i + 1) * base - 1
            };
            (start, end)
        })
        .collect()
}

fn segment_path(dest: &Path, index: u64) -> PathBuf {
    PathBuf::from(format!("{}.seg{index}", dest.display()))
}

async fn fetch_segmented(
    http: &reqwest::Client,
    url: &str,
    dest: &Path,
    content_length: u64,
    progress: ProgressFn,
) -> Result<(), DownloadError> {
    let throttle = ProgressThrottle::new(content_length, progress);
    let ranges = segment_ranges(content_length, N_SEGMENTS);

    let fetches = ranges.iter().enumerate().map(|(i, (start, end))| {
        let seg_path = segment_path(dest, i as u64);
        let throttle = Arc::clone(&throttle);
        async move { fetch_range(http, url, &seg_path, *start, *end, throttle).await }
    });

    if let Err(e) = try_join_all(fetches).await {
        remove_segments(dest).await;
        return Err(e);
    }

    // Merge in strictly increasing range index, never completion order.
    let merge = async {
        let mut out = BufWriter::with_capacity(READ_BUF, File::create(dest).await?);
        for i in 0..N_SEGMENTS {
            let mut seg = File::open(segment_path(dest, i)).await?;
            tokio::io::copy(&mut seg, &mut out).await?;
        }
        out.flush().await?;
        Ok::<_, std::io::Error>(())
    };
    if let Err(e) = merge.await {
        remove_segments(dest).await;
        let _ = tokio::fs::remove_file(dest).await;
        return Err(e.into());
    }

    remove_segments(dest).await;
    throttle.finish();

    Ok(())
}

async fn fetch_range(
    http: &reqwest::Client,
    url: &str,
    seg_path: &Path,
    start: u64,
    end: u64,
    throttle: Arc<ProgressThrottle>,
) -> Result<(), DownloadError> {
    let mut response = http
        .get(url)
        .header(header::RANGE, format!("bytes={start}-{end}"))
        .send()
        .await?;

    let status = response.status().as_u16();
    if status != 206 {
        warn!(status = status, "ranged GET did not return 206");
        return Err(DownloadError::from_status(status));
    }

    let mut out = BufWriter::with_capacity(READ_BUF, File::create(seg_path).await?);
    while let Some(chunk) = response.chunk().await? {
        out.write_all(&chunk).await?;
        throttle.record(chunk.len() as u64);
    }
    out.flush().await?;

    Ok(())
}

async fn fetch_single(
    http: &reqwest::Client,
    url: &str,
    dest: &Path,
    content_length: Option<u64>,
    progress: ProgressFn,
) -> Result<(), DownloadError> {
    let mut response = http.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::from_status(status.as_u16()));
    }

    let total = response.content_length().or(content_length).unwrap_or(0);
    let throttle = ProgressThrottle::new(total, progress);

    let mut out = BufWriter::with_capacity(READ_BUF, File::create(dest).await?);
    while let Some(chunk) = response.chunk().await? {
        out.write_all(&chunk).await?;
        throttle.record(chunk.len() as u64);
    }
    out.flush().await?;
    throttle.finish();

    Ok(())
}

/// Best-effort removal of all `.seg{i}` siblings.
pub async fn remove_segments(dest: &Path) {
    for i in 0..N_SEGMENTS {
        let _ = tokio::fs::remove_file(segment_path(dest, i)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_cover_everything_once() {
        let len = 10 * 1024 * 1024 + 37;
        let ranges = segment_ranges(len, N_SEGMENTS);
        assert_eq!(ranges.len(), N_SEGMENTS as usize);
        assert_eq!(ranges[0].0, 0);
        assert_eq!(ranges.last().unwrap().1, len - 1);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].1 + 1, pair[1].0);
        }
    }

    #[test]
    fn last_range_absorbs_remainder() {
        let ranges = segment_ranges(11, 4);
        // base = 2: [0,1] [2,3] [4,5] [6,10]
        assert_eq!(ranges, vec![(0, 1), (2, 3), (4, 5), (6, 10)]);
    }

    #[test]
    fn segment_paths_are_dest_siblings() {
        let seg = segment_path(Path::new("/music/Song.mp3.tmp"), 2);
        assert_eq!(seg, PathBuf::from("/music/Song.mp3.tmp.seg2"));
    }
}
