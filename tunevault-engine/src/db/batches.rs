//! Batch row operations

use crate::models::Batch;
use anyhow::Result;
use sqlx::{Row, SqlitePool};
use sqlx::sqlite::SqliteRow;
use std::str::FromStr;
use tunevault_common::types::BatchState;
use uuid::Uuid;

use super::{format_ts, now_str, parse_ts};

pub async fn insert_batch(pool: &SqlitePool, batch: &Batch) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO batches (
            id, source_url, source_platform, state,
            total_tracks, completed_count, failed_count,
            error_code, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(batch.id.to_string())
    .bind(&batch.source_url)
    .bind(batch.source_platform.as_str())
    .bind(batch.state.as_str())
    .bind(batch.total_tracks)
    .bind(batch.completed_count)
    .bind(batch.failed_count)
    .bind(&batch.error_code)
    .bind(format_ts(batch.created_at))
    .bind(format_ts(batch.updated_at))
    .execute(pool)
    .await?;

    Ok(())
}

/// Set state and optional error code.
pub async fn set_batch_state(
    pool: &SqlitePool,
    batch_id: Uuid,
    state: BatchState,
    error_code: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE batches SET state = ?, error_code = ?, updated_at = ? WHERE id = ?")
        .bind(state.as_str())
        .bind(error_code)
        .bind(now_str())
        .bind(batch_id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Persist the derived state together with the terminal counts.
pub async fn update_batch_counts(
    pool: &SqlitePool,
    batch_id: Uuid,
    state: BatchState,
    completed: i64,
    failed: i64,
) -> Result<()> {
    sqlx::query(
        "UPDATE batches SET state = ?, completed_count = ?, failed_count = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(state.as_str())
    .bind(completed)
    .bind(failed)
    .bind(now_str())
    .bind(batch_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn set_batch_total(pool: &SqlitePool, batch_id: Uuid, total: i64) -> Result<()> {
    sqlx::query("UPDATE batches SET total_tracks = ?, updated_at = ? WHERE id = ?")
        .bind(total)
        .bind(now_str())
        .bind(batch_id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn get_batch(pool: &SqlitePool, batch_id: Uuid) -> Result<Option<Batch>> {
    let row = sqlx::query("SELECT * FROM batches WHERE id = ?")
        .bind(batch_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|r| batch_from_row(&r)).transpose()
}

/// One batch together with all of its tracks.
pub async fn get_batch_with_tracks(
    pool: &SqlitePool,
    batch_id: Uuid,
) -> Result<Option<(Batch, Vec<crate::models::Track>)>> {
    let Some(batch) = get_batch(pool, batch_id).await? else {
        return Ok(None);
    };
    let tracks = super::tracks::get_tracks_for_batch(pool, batch_id).await?;
    Ok(Some((batch, tracks)))
}

/// All batches, newest first.
pub async fn list_batches(pool: &SqlitePool) -> Result<Vec<Batch>> {
    let rows = sqlx::query("SELECT * FROM batches ORDER BY created_at DESC")
        .fetch_all(pool)
        .await?;

    rows.iter().map(batch_from_row).collect()
}

fn batch_from_row(row: &SqliteRow) -> Result<Batch> {
    let id: String = row.get("id");
    let platform: String = row.get("source_platform");
    let state: String = row.get("state");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Batch {
        id: Uuid::parse_str(&id)?,
        source_url: row.get("source_url"),
        source_platform: FromStr::from_str(&platform)
            .map_err(|e| anyhow::anyhow!("{e}"))?,
        state: FromStr::from_str(&state).map_err(|e| anyhow::anyhow!("{e}"))?,
        total_tracks: row.get("total_tracks"),
        completed_count: row.get("completed_count"),
        failed_count: row.get("failed_count"),
        error_code: row.get("error_code"),
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}
