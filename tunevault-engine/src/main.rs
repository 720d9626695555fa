//! tunevault-engine - batch music download engine
//!
//! Foreground host for the engine: resolves configuration, opens the
//! store, runs the crash-recovery pass, launches the long-lived engine
//! tasks, and serves the HTTP facade on localhost.

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tunevault_common::config;
use tunevault_engine::{build_router, db, AppState, DEFAULT_PORT};

#[tokio::main]
async fn main() -> Result<()> {
    let toml_config = config::load_config()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(
            toml_config
                .logging
                .level
                .as_deref()
                .unwrap_or("info"),
        )
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting tunevault-engine");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let cli_root = std::env::args().nth(1);
    let root_folder = config::resolve_root_folder(cli_root.as_deref(), &toml_config);
    info!("Root folder: {}", root_folder.display());

    let music_dir = root_folder.join("Music");
    std::fs::create_dir_all(&music_dir)?;

    let db_path = root_folder.join("tunevault.db");
    let pool = db::init_pool(&db_path).await?;
    info!("Database: {}", db_path.display());

    let state = AppState::new(pool, &toml_config, music_dir);

    // Requeue whatever a previous process lifetime left mid-flight before
    // the dispatcher can see the queue.
    state.manager.recover().await;

    state.spawn_background_tasks();

    let port = toml_config.port.unwrap_or(DEFAULT_PORT);
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    info!("Listening on http://127.0.0.1:{port}");

    axum::serve(listener, build_router(state)).await?;

    Ok(())
}
