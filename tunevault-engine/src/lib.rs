//! TuneVault engine library
//!
//! Everything the binary wires together, exposed for integration testing:
//! the persistence store, extractors, mapper, resolver, downloaders, the
//! batch manager, and the HTTP facade.

pub mod api;
pub mod db;
pub mod download;
pub mod extractor;
pub mod matcher;
pub mod models;
pub mod orchestrator;
pub mod platform;
pub mod resolver;
pub mod tasks;

use axum::Router;
use extractor::{CatalogClient, Extractors};
use matcher::TrackMapper;
use orchestrator::BatchManager;
use platform::PlatformClient;
use reqwest::header::{self, HeaderValue};
use resolver::StreamResolver;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tasks::TaskRegistry;
use tunevault_common::config::TomlConfig;
use tunevault_common::events::EventBus;

/// Default primary API instance for the video platform
pub const DEFAULT_API_INSTANCE: &str = "https://pipedapi.kavin.rocks";

/// Default mirror instances tried when the primary fails
pub const DEFAULT_MIRROR_INSTANCES: &[&str] = &[
    "https://pipedapi.adminforge.de",
    "https://api.piped.yt",
];

/// Default facade port
pub const DEFAULT_PORT: u16 = 5850;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub http: reqwest::Client,
    pub platform: Arc<PlatformClient>,
    pub resolver: Arc<StreamResolver>,
    pub manager: Arc<BatchManager>,
    pub tasks: Arc<TaskRegistry>,
    pub events: EventBus,
    pub music_dir: PathBuf,
}

impl AppState {
    /// Assemble the full engine from a database pool and configuration.
    pub fn new(db: SqlitePool, config: &TomlConfig, music_dir: PathBuf) -> Self {
        let http = build_http_client();

        let instance = config
            .api_instance
            .clone()
            .unwrap_or_else(|| DEFAULT_API_INSTANCE.to_string());
        let platform = Arc::new(PlatformClient::new(http.clone(), instance));

        let mirrors = config.mirror_instances.clone().unwrap_or_else(|| {
            DEFAULT_MIRROR_INSTANCES
                .iter()
                .map(|s| s.to_string())
                .collect()
        });
        let resolver = Arc::new(StreamResolver::new(Arc::clone(&platform), mirrors));

        let catalog_client = Arc::new(CatalogClient::new(
            http.clone(),
            config.catalog_client_id.clone(),
            config.catalog_client_secret.clone(),
        ));
        let extractors = Extractors {
            video_playlist: extractor::video_playlist::VideoPlaylistExtractor::new(Arc::clone(
                &platform,
            )),
            catalog: extractor::catalog::CatalogExtractor::new(catalog_client, http.clone()),
            scrape: extractor::scrape::ScrapeExtractor::new(http.clone()),
        };

        let events = EventBus::new(256);
        let manager = BatchManager::new(
            db.clone(),
            http.clone(),
            Arc::clone(&resolver),
            TrackMapper::new(Arc::clone(&platform)),
            extractors,
            events.clone(),
            music_dir.clone(),
        );

        Self {
            db,
            http,
            platform,
            resolver,
            manager,
            tasks: Arc::new(TaskRegistry::new()),
            events,
            music_dir,
        }
    }

    /// Launch the engine's long-lived tasks: dispatch loop, watchdog, and
    /// concurrency ramp-up. Call once, after recovery.
    pub fn spawn_background_tasks(&self) {
        tokio::spawn(Arc::clone(&self.manager).run_dispatch_loop());
        tokio::spawn(Arc::clone(&self.manager).run_watchdog());
        tokio::spawn(Arc::clone(&self.manager).run_ramp_up());
    }
}

/// The engine's single shared HTTP client: pooled, identity encoding,
/// conservative timeouts, redirects on.
pub fn build_http_client() -> reqwest::Client {
    let mut headers = header::HeaderMap::new();
    headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));

    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(15))
        .timeout(Duration::from_secs(60))
        .pool_max_idle_per_host(5)
        .default_headers(headers)
        .build()
        .expect("failed to build HTTP client")
}

/// Build the facade router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{get, post};

    Router::new()
        .route("/api/search", post(api::search::search))
        .route("/api/suggestions", post(api::search::suggestions))
        .route("/api/download", post(api::download::start_download))
        .route("/api/search-download", post(api::download::search_download))
        .route("/api/prefetch", post(api::download::prefetch))
        .route("/api/progress/:task_id", get(api::download::progress))
        .route("/api/import", post(api::import::import))
        .route("/api/import/list", get(api::import::import_list))
        .route("/api/import/status/:batch_id", get(api::import::import_status))
        .route("/api/import/action", post(api::import::import_action))
        .route("/api/import/events", get(api::sse::import_events))
        .route("/api/library", get(api::library::library))
        .route("/api/music/:filename", get(api::library::stream_music))
        .route("/api/delete", post(api::library::delete))
        .route("/health", get(api::health::health))
        .with_state(state)
}
