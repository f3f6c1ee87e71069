//! SSE egress — `GET /stream/{conversation_id}`.
//!
//! Tails `stream:<conversation_id>` and frames each bus entry as one SSE
//! event: the `id:` line carries the bus cursor, the `data:` line the
//! stored event JSON verbatim. Resume is cursor-based via the
//! `Last-Event-ID` header or the `since` query parameter.
//!
//! The generator is one spawned task per connection feeding a bounded
//! channel; when the client goes away the channel send fails and the task
//! exits, releasing its bus reads. Keepalive comments hold the connection
//! open through idle periods.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::Stream;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use hivebus_bus::Bus;
use hivebus_core::error::BusError;
use hivebus_core::event::StreamEvent;
use hivebus_core::topic;

use crate::SharedState;

const READ_LIMIT: usize = 100;
const READ_BLOCK_MS: u64 = 1_000;
/// Pause after an empty read; bounded so disconnects are noticed promptly.
const IDLE_SLEEP: Duration = Duration::from_millis(50);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);
/// Upper clamp for `max_events`; zero clamps up to one.
const MAX_EVENTS_CAP: usize = 10_000;

#[derive(Deserialize)]
pub struct StreamParams {
    /// Bound on events delivered over this connection.
    max_events: Option<usize>,
    /// Explicit resume cursor; overrides the `Last-Event-ID` header.
    since: Option<String>,
}

/// `GET /stream/{conversation_id}` — long-lived `text/event-stream`.
pub async fn stream_handler(
    State(state): State<SharedState>,
    Path(conversation_id): Path<String>,
    Query(params): Query<StreamParams>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let resume = params.since.clone().or_else(|| {
        headers
            .get("last-event-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    });
    let max_events = params
        .max_events
        .or(state.max_events)
        .map(|n| n.clamp(1, MAX_EVENTS_CAP));

    debug!(
        conversation_id = %conversation_id,
        resume = ?resume,
        max_events = ?max_events,
        "stream subscriber connected"
    );

    let (tx, rx) = mpsc::channel::<SseEvent>(64);
    tokio::spawn(pump_events(
        state.bus.clone(),
        conversation_id,
        resume,
        max_events,
        tx,
    ));

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEPALIVE_INTERVAL)
            .text("keepalive"),
    )
}

/// Per-connection generator: polls the bus and forwards entries until the
/// cap is reached, the client disconnects, or the bus becomes unusable.
async fn pump_events(
    bus: Arc<dyn Bus>,
    conversation_id: String,
    resume: Option<String>,
    max_events: Option<usize>,
    tx: mpsc::Sender<SseEvent>,
) {
    let stream_topic = topic::stream_for(&conversation_id);
    let mut cursor = resume;
    let mut sent = 0usize;

    // No resume cursor means live tail: pin to the newest existing entry so
    // history is not replayed.
    if cursor.is_none() {
        if let Ok(batch) = bus.read(&stream_topic, None, 1, 0).await {
            cursor = batch.last().map(|e| e.cursor.clone());
        }
    }

    loop {
        // A disconnected client is only otherwise noticed on the next send;
        // check here so idle connections release their bus reads too.
        if tx.is_closed() {
            return;
        }
        match bus
            .read(&stream_topic, cursor.as_deref(), READ_LIMIT, READ_BLOCK_MS)
            .await
        {
            Ok(batch) if batch.is_empty() => {
                // The blocking read already waited; this pause only paces
                // backends without blocking support.
                tokio::time::sleep(IDLE_SLEEP).await;
            }
            Ok(batch) => {
                for entry in batch {
                    cursor = Some(entry.cursor.clone());
                    let data = serde_json::to_string(&entry.message.payload)
                        .unwrap_or_else(|_| "{}".into());
                    let event = SseEvent::default().id(entry.cursor).data(data);
                    if tx.send(event).await.is_err() {
                        return; // client disconnected
                    }
                    sent += 1;
                    if max_events.is_some_and(|max| sent >= max) {
                        return;
                    }
                }
            }
            Err(BusError::InvalidCursor(_)) => {
                // Unusable resume point: warn the client, then replay from
                // the earliest entry the backend still holds. The warning
                // carries no id so it never becomes a resume cursor.
                warn!(
                    conversation_id = %conversation_id,
                    cursor = ?cursor,
                    "resume cursor not usable, replaying from earliest"
                );
                let log = StreamEvent::log(
                    &conversation_id,
                    "warning",
                    "gateway",
                    "resume cursor predates retention; replaying from earliest available",
                );
                let data = serde_json::to_string(&log).unwrap_or_else(|_| "{}".into());
                if tx.send(SseEvent::default().data(data)).await.is_err() {
                    return;
                }
                cursor = Some(bus.earliest_cursor().to_string());
            }
            Err(e) => {
                warn!(
                    conversation_id = %conversation_id,
                    error = %e,
                    "stream read failed, closing connection"
                );
                let log = StreamEvent::log(&conversation_id, "error", "gateway", e.to_string());
                let data = serde_json::to_string(&log).unwrap_or_else(|_| "{}".into());
                let _ = tx.send(SseEvent::default().data(data)).await;
                return;
            }
        }
    }
}
