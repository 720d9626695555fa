//! Server-Sent Events stream for import progress

use crate::AppState;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info, warn};

/// GET /api/import/events - live engine events for the web UI
///
/// Streams every [`tunevault_common::events::EngineEvent`] as a named SSE
/// event with a JSON payload, plus a comment heartbeat every 15 seconds so
/// proxies don't reap the connection.
pub async fn import_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("SSE client connected to import events");

    let mut rx = state.events.subscribe();

    let stream = async_stream::stream! {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(15)) => {
                    debug!("SSE heartbeat");
                    yield Ok(Event::default().comment("heartbeat"));
                }

                received = rx.recv() => {
                    match received {
                        Ok(event) => {
                            match serde_json::to_string(&event) {
                                Ok(payload) => {
                                    yield Ok(Event::default()
                                        .event(event.event_type())
                                        .data(payload));
                                }
                                Err(e) => {
                                    warn!(error = %e, "failed to serialize engine event");
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped = skipped, "SSE subscriber lagged, events dropped");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            break;
                        }
                    }
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
