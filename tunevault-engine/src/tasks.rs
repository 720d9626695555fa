//! On-demand single-song download tasks
//!
//! The facade's `/api/download` path is a degenerate batch of one: no batch
//! row, no mapper, just resolve-and-fetch with progress polled out of an
//! in-memory registry. Uses the resumable fetcher so a flaky connection
//! picks up where it left off.

use crate::download::resume::{self, ResumeEvent, ResumeEventFn};
use crate::platform::extract_video_id;
use crate::resolver::{codec_ext_for_url, StreamResolver, ALL_METHODS_FAILED};
use dashmap::DashMap;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tunevault_common::fingerprint::{human_size, sanitize_filename};
use uuid::Uuid;

/// Facade-visible task status strings
pub const STATUS_EXTRACTING: &str = "extracting";
pub const STATUS_DOWNLOADING: &str = "downloading";
pub const STATUS_PAUSED: &str = "paused";
pub const STATUS_CONVERTING: &str = "converting";
pub const STATUS_DONE: &str = "done";
pub const STATUS_ERROR: &str = "error";

/// Final payload for a finished task
#[derive(Debug, Clone, Serialize)]
pub struct DownloadOutcome {
    pub success: bool,
    pub filename: String,
    pub title: String,
    pub size: u64,
    pub size_human: String,
}

/// Poll snapshot of one task
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub status: String,
    pub percent: u8,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<DownloadOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// In-memory registry of on-demand download tasks
#[derive(Default)]
pub struct TaskRegistry {
    tasks: DashMap<String, TaskSnapshot>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, title: String) -> String {
        let task_id = Uuid::new_v4().to_string();
        self.tasks.insert(
            task_id.clone(),
            TaskSnapshot {
                status: STATUS_EXTRACTING.to_string(),
                percent: 0,
                title,
                message: None,
                result: None,
                error: None,
            },
        );
        task_id
    }

    pub fn get(&self, task_id: &str) -> Option<TaskSnapshot> {
        self.tasks.get(task_id).map(|t| t.value().clone())
    }

    pub fn set_status(&self, task_id: &str, status: &str, message: Option<String>) {
        if let Some(mut task) = self.tasks.get_mut(task_id) {
            task.status = status.to_string();
            task.message = message;
        }
    }

    pub fn set_progress(&self, task_id: &str, percent: u8) {
        if let Some(mut task) = self.tasks.get_mut(task_id) {
            task.status = STATUS_DOWNLOADING.to_string();
            task.percent = percent;
            task.message = None;
        }
    }

    pub fn complete(&self, task_id: &str, outcome: DownloadOutcome) {
        if let Some(mut task) = self.tasks.get_mut(task_id) {
            task.status = STATUS_DONE.to_string();
            task.percent = 100;
            task.message = None;
            task.result = Some(outcome);
        }
    }

    pub fn fail(&self, task_id: &str, error: impl Into<String>) {
        let error = error.into();
        if let Some(mut task) = self.tasks.get_mut(task_id) {
            task.status = STATUS_ERROR.to_string();
            task.error = Some(error);
        }
    }
}

/// Kick off a single-song download, returning the task id immediately.
pub fn spawn_download(
    registry: Arc<TaskRegistry>,
    http: reqwest::Client,
    resolver: Arc<StreamResolver>,
    music_dir: PathBuf,
    url: String,
    title: Option<String>,
) -> String {
    let display_title = title.clone().unwrap_or_else(|| "Unknown".to_string());
    let task_id = registry.create(display_title.clone());
    let id = task_id.clone();

    tokio::spawn(async move {
        let Some(video_id) = extract_video_id(&url) else {
            registry.fail(&id, format!("unsupported URL: {url}"));
            return;
        };

        let Some(stream_url) = resolver.resolve(&video_id).await else {
            registry.fail(&id, ALL_METHODS_FAILED);
            return;
        };

        let ext = codec_ext_for_url(&stream_url);
        let final_path = music_dir.join(format!("{}.{ext}", sanitize_filename(&display_title)));

        registry.set_status(&id, STATUS_DOWNLOADING, None);

        let events: ResumeEventFn = {
            let registry = Arc::clone(&registry);
            let id = id.clone();
            Arc::new(move |event| match event {
                ResumeEvent::Progress { percent } => registry.set_progress(&id, percent),
                ResumeEvent::Paused { retry_in } => registry.set_status(
                    &id,
                    STATUS_PAUSED,
                    Some(format!("retrying in {}s", retry_in.as_secs())),
                ),
            })
        };

        match resume::fetch_resumable(&http, &resolver, &video_id, stream_url, &final_path, events)
            .await
        {
            Ok(_bytes) => {
                registry.set_status(&id, STATUS_CONVERTING, None);

                let tmp = PathBuf::from(format!("{}.tmp", final_path.display()));
                if let Err(e) = tokio::fs::rename(&tmp, &final_path).await {
                    warn!(task_id = %id, error = %e, "rename failed");
                    registry.fail(&id, format!("rename failed: {e}"));
                    return;
                }

                let size = tokio::fs::metadata(&final_path)
                    .await
                    .map(|m| m.len())
                    .unwrap_or(0);
                let filename = final_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();

                info!(task_id = %id, file = %filename, bytes = size, "single download complete");

                registry.complete(
                    &id,
                    DownloadOutcome {
                        success: true,
                        filename,
                        title: display_title.clone(),
                        size,
                        size_human: human_size(size),
                    },
                );
            }
            Err(e) => {
                warn!(task_id = %id, error = %e, "single download failed");
                registry.fail(&id, e.to_string());
            }
        }
    });

    task_id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_lifecycle() {
        let registry = TaskRegistry::new();
        let id = registry.create("Song".into());

        let snapshot = registry.get(&id).unwrap();
        assert_eq!(snapshot.status, STATUS_EXTRACTING);
        assert_eq!(snapshot.percent, 0);

        registry.set_progress(&id, 42);
        assert_eq!(registry.get(&id).unwrap().percent, 42);
        assert_eq!(registry.get(&id).unwrap().status, STATUS_DOWNLOADING);

        registry.set_status(&id, STATUS_PAUSED, Some("retrying in 4s".into()));
        let paused = registry.get(&id).unwrap();
        assert_eq!(paused.status, STATUS_PAUSED);
        assert_eq!(paused.message.as_deref(), Some("retrying in 4s"));

        registry.complete(
            &id,
            DownloadOutcome {
                success: true,
                filename: "Song.opus".into(),
                title: "Song".into(),
                size: 1024,
                size_human: "1.0 KB".into(),
            },
        );
        let done = registry.get(&id).unwrap();
        assert_eq!(done.status, STATUS_DONE);
        assert_eq!(done.percent, 100);
        assert!(done.result.is_some());
    }

    #[test]
    fn unknown_task_is_none() {
        let registry = TaskRegistry::new();
        assert!(registry.get("nope").is_none());
        registry.fail("nope", "ignored");
    }
}
