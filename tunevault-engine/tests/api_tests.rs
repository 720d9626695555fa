//! HTTP facade tests against a real listener
//!
//! Spins the router up on an ephemeral port and exercises the endpoints
//! that don't need outbound network access.

use serde_json::Value;
use tempfile::TempDir;
use tunevault_common::config::TomlConfig;
use tunevault_common::types::SourcePlatform;
use tunevault_engine::models::Batch;
use tunevault_engine::{build_router, db, AppState};

struct TestServer {
    _dir: TempDir,
    base_url: String,
    state: AppState,
    client: reqwest::Client,
}

async fn start_server() -> TestServer {
    let dir = TempDir::new().unwrap();
    let pool = db::init_pool(&dir.path().join("engine.db")).await.unwrap();
    let music_dir = dir.path().join("Music");
    std::fs::create_dir_all(&music_dir).unwrap();

    let config = TomlConfig {
        api_instance: Some("http://127.0.0.1:9".to_string()),
        mirror_instances: Some(Vec::new()),
        ..Default::default()
    };
    let state = AppState::new(pool, &config, music_dir);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = build_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestServer {
        _dir: dir,
        base_url: format!("http://{addr}"),
        state,
        client: reqwest::Client::new(),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn health_reports_engine_counters() {
    let server = start_server().await;

    let body: Value = server
        .client
        .get(format!("{}/health", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "ok");
    assert_eq!(body["max_concurrent"], 8);
    assert_eq!(body["active_workers"], 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn import_rejects_empty_url_in_band() {
    let server = start_server().await;

    let response = server
        .client
        .post(format!("{}/api/import", server.base_url))
        .json(&serde_json::json!({ "url": "  " }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "No URL provided");
}

#[tokio::test(flavor = "multi_thread")]
async fn import_list_returns_persisted_batches() {
    let server = start_server().await;

    let body: Value = server
        .client
        .get(format!("{}/api/import/list", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, serde_json::json!([]));

    let batch = Batch::new("https://example.com/playlist/p", SourcePlatform::Catalog);
    db::batches::insert_batch(&server.state.db, &batch).await.unwrap();

    let body: Value = server
        .client
        .get(format!("{}/api/import/list", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let batches = body.as_array().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0]["state"], "EXTRACTING");
    assert_eq!(batches[0]["id"], batch.id.to_string());
}

#[tokio::test(flavor = "multi_thread")]
async fn import_status_includes_batch_and_tracks() {
    let server = start_server().await;

    let batch = Batch::new("https://example.com/playlist/p", SourcePlatform::Catalog);
    db::batches::insert_batch(&server.state.db, &batch).await.unwrap();

    let body: Value = server
        .client
        .get(format!("{}/api/import/status/{}", server.base_url, batch.id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["batch"]["id"], batch.id.to_string());
    assert_eq!(body["tracks"], serde_json::json!([]));

    let body: Value = server
        .client
        .get(format!(
            "{}/api/import/status/{}",
            server.base_url,
            uuid::Uuid::new_v4()
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["error"], "Batch not found");
}

#[tokio::test(flavor = "multi_thread")]
async fn action_on_unknown_track_reports_error_in_band() {
    let server = start_server().await;

    let response = server
        .client
        .post(format!("{}/api/import/action", server.base_url))
        .json(&serde_json::json!({
            "track_id": uuid::Uuid::new_v4(),
            "action": "manual",
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "track not found");
}

#[tokio::test(flavor = "multi_thread")]
async fn progress_for_unknown_task() {
    let server = start_server().await;

    let body: Value = server
        .client
        .get(format!("{}/api/progress/nope", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["error"], "Unknown task");
}

#[tokio::test(flavor = "multi_thread")]
async fn library_lists_and_streams_and_deletes() {
    let server = start_server().await;

    // Empty at first.
    let body: Value = server
        .client
        .get(format!("{}/api/library", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, serde_json::json!([]));

    // Drop a file in and list again.
    let song_path = server.state.music_dir.join("Test Song.mp3");
    std::fs::write(&song_path, vec![0u8; 4096]).unwrap();
    // A non-audio neighbor must not show up.
    std::fs::write(server.state.music_dir.join("notes.txt"), b"x").unwrap();

    let body: Value = server
        .client
        .get(format!("{}/api/library", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let songs = body.as_array().unwrap();
    assert_eq!(songs.len(), 1);
    assert_eq!(songs[0]["filename"], "Test Song.mp3");
    assert_eq!(songs[0]["title"], "Test Song");
    assert_eq!(songs[0]["codec"], "mp3");
    assert_eq!(songs[0]["size"], 4096);

    // Stream it back.
    let response = server
        .client
        .get(format!("{}/api/music/Test%20Song.mp3", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "audio/mpeg"
    );
    assert_eq!(response.bytes().await.unwrap().len(), 4096);

    // Delete refuses traversal and foreign files, accepts the song.
    let body: Value = server
        .client
        .post(format!("{}/api/delete", server.base_url))
        .json(&serde_json::json!({ "filename": "../engine.db" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["error"], "File not found");

    let body: Value = server
        .client
        .post(format!("{}/api/delete", server.base_url))
        .json(&serde_json::json!({ "filename": "Test Song.mp3" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["success"], true);
    assert!(!song_path.exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn prefetch_with_unusable_url_is_harmless() {
    let server = start_server().await;

    let body: Value = server
        .client
        .post(format!("{}/api/prefetch", server.base_url))
        .json(&serde_json::json!({ "url": "https://example.com/not-a-watch-page" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["prefetching"], false);
    assert_eq!(body["cached"], false);
}

#[tokio::test(flavor = "multi_thread")]
async fn download_requires_a_url() {
    let server = start_server().await;

    let body: Value = server
        .client
        .post(format!("{}/api/download", server.base_url))
        .json(&serde_json::json!({ "url": "" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["error"], "No URL provided");
}
