//! Database access for the engine
//!
//! One embedded SQLite store holds the batch and track rows. Every mutation
//! is a single-row write and durable before the call returns; state-machine
//! coherence across read-modify-write sequences is enforced by the batch
//! manager's transition mutex, not by multi-row transactions.

pub mod batches;
pub mod tracks;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
pub async fn init_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Proper SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// Create the engine tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS batches (
            id TEXT PRIMARY KEY,
            source_url TEXT NOT NULL,
            source_platform TEXT NOT NULL,
            state TEXT NOT NULL,
            total_tracks INTEGER NOT NULL DEFAULT 0,
            completed_count INTEGER NOT NULL DEFAULT 0,
            failed_count INTEGER NOT NULL DEFAULT 0,
            error_code TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tracks (
            id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL REFERENCES batches(id),
            fingerprint TEXT NOT NULL,
            title TEXT NOT NULL,
            artist TEXT NOT NULL,
            duration_seconds INTEGER,
            thumbnail_url TEXT,
            source_platform TEXT NOT NULL,
            source_video_id TEXT,
            match_confidence REAL,
            status TEXT NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            bytes_downloaded INTEGER NOT NULL DEFAULT 0,
            total_bytes INTEGER NOT NULL DEFAULT 0,
            output_file_path TEXT,
            error_code TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Extractors may emit duplicates; the store dedups per batch.
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_tracks_batch_fingerprint
         ON tracks(batch_id, fingerprint)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tracks_status ON tracks(status)")
        .execute(pool)
        .await?;

    tracing::info!("Database tables initialized (batches, tracks)");

    Ok(())
}

/// Current time as fixed-width RFC3339 text.
///
/// Microsecond precision keeps the strings lexicographically ordered, which
/// the FIFO queue query relies on.
pub(crate) fn now_str() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
