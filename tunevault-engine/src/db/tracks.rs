//! Track row operations

use crate::models::Track;
use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tunevault_common::types::{StatusCounts, TrackStatus};
use uuid::Uuid;

use super::{format_ts, now_str, parse_ts};

/// Bulk-insert extracted tracks, deduplicating on (batch_id, fingerprint).
///
/// Returns the number of rows actually inserted; duplicate candidates from
/// the extractor are silently dropped by the unique index.
pub async fn insert_tracks_bulk(pool: &SqlitePool, tracks: &[Track]) -> Result<usize> {
    let mut inserted = 0;
    for track in tracks {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO tracks (
                id, batch_id, fingerprint, title, artist,
                duration_seconds, thumbnail_url, source_platform,
                source_video_id, match_confidence, status, retry_count,
                bytes_downloaded, total_bytes, output_file_path, error_code,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(track.id.to_string())
        .bind(track.batch_id.to_string())
        .bind(&track.fingerprint)
        .bind(&track.title)
        .bind(&track.artist)
        .bind(track.duration_seconds)
        .bind(&track.thumbnail_url)
        .bind(track.source_platform.as_str())
        .bind(&track.source_video_id)
        .bind(track.match_confidence)
        .bind(track.status.as_str())
        .bind(track.retry_count)
        .bind(track.bytes_downloaded)
        .bind(track.total_bytes)
        .bind(&track.output_file_path)
        .bind(&track.error_code)
        .bind(format_ts(track.created_at))
        .bind(format_ts(track.updated_at))
        .execute(pool)
        .await?;

        inserted += result.rows_affected() as usize;
    }

    Ok(inserted)
}

pub async fn get_track(pool: &SqlitePool, track_id: Uuid) -> Result<Option<Track>> {
    let row = sqlx::query("SELECT * FROM tracks WHERE id = ?")
        .bind(track_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|r| track_from_row(&r)).transpose()
}

pub async fn get_tracks_for_batch(pool: &SqlitePool, batch_id: Uuid) -> Result<Vec<Track>> {
    let rows = sqlx::query("SELECT * FROM tracks WHERE batch_id = ? ORDER BY created_at ASC")
        .bind(batch_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(track_from_row).collect()
}

/// Queued tracks in FIFO order by last update.
pub async fn get_queued_tracks(pool: &SqlitePool) -> Result<Vec<Track>> {
    let rows = sqlx::query("SELECT * FROM tracks WHERE status = 'QUEUED' ORDER BY updated_at ASC")
        .fetch_all(pool)
        .await?;

    rows.iter().map(track_from_row).collect()
}

/// Tracks that a prior process lifetime left mid-flight.
pub async fn get_stalled_tracks(pool: &SqlitePool) -> Result<Vec<Track>> {
    let rows =
        sqlx::query("SELECT * FROM tracks WHERE status IN ('DISPATCHING', 'DOWNLOADING')")
            .fetch_all(pool)
            .await?;

    rows.iter().map(track_from_row).collect()
}

/// Persist a status change. The caller (batch manager) has already checked
/// transition legality under its mutex.
pub async fn set_track_status(
    pool: &SqlitePool,
    track_id: Uuid,
    status: TrackStatus,
) -> Result<()> {
    sqlx::query("UPDATE tracks SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(now_str())
        .bind(track_id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Reset byte counters, used on requeue.
pub async fn reset_track_bytes(pool: &SqlitePool, track_id: Uuid) -> Result<()> {
    sqlx::query(
        "UPDATE tracks SET bytes_downloaded = 0, total_bytes = 0, updated_at = ? WHERE id = ?",
    )
    .bind(now_str())
    .bind(track_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn set_track_match(
    pool: &SqlitePool,
    track_id: Uuid,
    source_video_id: &str,
    confidence: f64,
) -> Result<()> {
    sqlx::query(
        "UPDATE tracks SET source_video_id = ?, match_confidence = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(source_video_id)
    .bind(confidence)
    .bind(now_str())
    .bind(track_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn set_track_error(
    pool: &SqlitePool,
    track_id: Uuid,
    error_code: &str,
    retry_count: i64,
) -> Result<()> {
    sqlx::query("UPDATE tracks SET error_code = ?, retry_count = ?, updated_at = ? WHERE id = ?")
        .bind(error_code)
        .bind(retry_count)
        .bind(now_str())
        .bind(track_id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn set_track_output_path(
    pool: &SqlitePool,
    track_id: Uuid,
    output_file_path: &str,
) -> Result<()> {
    sqlx::query("UPDATE tracks SET output_file_path = ?, updated_at = ? WHERE id = ?")
        .bind(output_file_path)
        .bind(now_str())
        .bind(track_id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Throttled byte progress from a worker.
pub async fn set_track_progress(
    pool: &SqlitePool,
    track_id: Uuid,
    bytes_downloaded: i64,
    total_bytes: i64,
) -> Result<()> {
    sqlx::query(
        "UPDATE tracks SET bytes_downloaded = ?, total_bytes = ?, updated_at = ? WHERE id = ?",
    )
    .bind(bytes_downloaded)
    .bind(total_bytes)
    .bind(now_str())
    .bind(track_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Per-status counts for one batch, used by the derived-state function.
pub async fn count_statuses_for_batch(
    pool: &SqlitePool,
    batch_id: Uuid,
) -> Result<StatusCounts> {
    let rows = sqlx::query(
        "SELECT status, COUNT(*) AS n FROM tracks WHERE batch_id = ? GROUP BY status",
    )
    .bind(batch_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut counts = StatusCounts::default();
    for row in rows {
        let status: String = row.get("status");
        let n: i64 = row.get("n");
        counts.total += n;
        match status.parse::<TrackStatus>() {
            Ok(TrackStatus::Completed) => counts.completed += n,
            Ok(TrackStatus::Failed) => counts.failed += n,
            Ok(TrackStatus::MatchedLowConfidence) => counts.low_confidence += n,
            Ok(
                TrackStatus::Matching
                | TrackStatus::Queued
                | TrackStatus::Dispatching
                | TrackStatus::Downloading,
            ) => counts.active += n,
            _ => {}
        }
    }

    Ok(counts)
}

fn track_from_row(row: &SqliteRow) -> Result<Track> {
    let id: String = row.get("id");
    let batch_id: String = row.get("batch_id");
    let platform: String = row.get("source_platform");
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Track {
        id: Uuid::parse_str(&id)?,
        batch_id: Uuid::parse_str(&batch_id)?,
        fingerprint: row.get("fingerprint"),
        title: row.get("title"),
        artist: row.get("artist"),
        duration_seconds: row.get("duration_seconds"),
        thumbnail_url: row.get("thumbnail_url"),
        source_platform: FromStr::from_str(&platform).map_err(|e| anyhow::anyhow!("{e}"))?,
        source_video_id: row.get("source_video_id"),
        match_confidence: row.get("match_confidence"),
        status: status.parse().map_err(|e| anyhow::anyhow!("{e}"))?,
        retry_count: row.get("retry_count"),
        bytes_downloaded: row.get("bytes_downloaded"),
        total_bytes: row.get("total_bytes"),
        output_file_path: row.get("output_file_path"),
        error_code: row.get("error_code"),
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}
