//! Engine event types and the broadcast EventBus
//!
//! Every state-machine transition and progress update in the engine is
//! mirrored onto the bus so the HTTP facade can stream it to clients over
//! SSE without polling the store.

use crate::types::{BatchState, TrackStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Engine event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// A batch was accepted and its tracks inserted
    BatchSubmitted {
        batch_id: Uuid,
        track_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Derived batch state or counts changed
    BatchStateChanged {
        batch_id: Uuid,
        state: BatchState,
        completed: i64,
        failed: i64,
        total: i64,
        timestamp: DateTime<Utc>,
    },

    /// A batch failed before any tracks were inserted
    BatchFailed {
        batch_id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A track moved along the state machine
    TrackStatusChanged {
        track_id: Uuid,
        batch_id: Uuid,
        status: TrackStatus,
        timestamp: DateTime<Utc>,
    },

    /// Throttled byte-level progress for a downloading track
    TrackProgress {
        track_id: Uuid,
        bytes_downloaded: i64,
        total_bytes: i64,
        bytes_per_sec: f64,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::BatchSubmitted { .. } => "batch_submitted",
            EngineEvent::BatchStateChanged { .. } => "batch_state_changed",
            EngineEvent::BatchFailed { .. } => "batch_failed",
            EngineEvent::TrackStatusChanged { .. } => "track_status_changed",
            EngineEvent::TrackProgress { .. } => "track_progress",
        }
    }
}

/// Central event distribution bus
///
/// Wraps `tokio::sync::broadcast`: non-blocking publish, any number of
/// subscribers, slow subscribers lag rather than block producers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a new bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers. A bus with no subscribers drops
    /// the event; that is not an error for the engine.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(EngineEvent::BatchSubmitted {
            batch_id: Uuid::new_v4(),
            track_count: 3,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "batch_submitted");
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.emit(EngineEvent::BatchFailed {
            batch_id: Uuid::new_v4(),
            error: "could not extract".into(),
            timestamp: Utc::now(),
        });
    }
}
