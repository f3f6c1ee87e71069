//! HTTP gateway for hivebus.
//!
//! Endpoints:
//!
//! - `POST /send`                      — validate an envelope and publish it
//! - `GET  /stream/{conversation_id}`  — SSE tail of a conversation's events
//! - `GET  /health`                    — process liveness
//! - `GET  /ready`                     — bus reachability
//!
//! Built on Axum. Ingress handlers never block on the bus longer than the
//! bounded publish retry; the SSE generator runs on its own task so one
//! slow client never stalls another connection.

pub mod sse;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use hivebus_bus::{publish_envelope, publish_event, Bus};
use hivebus_core::envelope::Envelope;
use hivebus_core::event::StreamEvent;

/// Attempts for the ingress publish before surfacing 503.
const PUBLISH_ATTEMPTS: u32 = 3;
const PUBLISH_BACKOFF_START: Duration = Duration::from_millis(50);
const PUBLISH_BACKOFF_CAP: Duration = Duration::from_millis(200);

/// Shared state for the gateway.
pub struct GatewayState {
    pub bus: Arc<dyn Bus>,
    /// Optional per-connection SSE event cap applied when the client
    /// doesn't pass `max_events` itself.
    pub max_events: Option<usize>,
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/send", post(send_handler))
        .route("/stream/{conversation_id}", get(sse::stream_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway HTTP server. Blocks until the listener fails.
pub async fn start(
    addr: &str,
    bus: Arc<dyn Bus>,
    max_events: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = Arc::new(GatewayState { bus, max_events });
    let app = build_router(state);

    info!(addr = %addr, "gateway starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct SendResponse {
    pub ok: bool,
    pub id: String,
    pub published_to: Vec<String>,
}

#[derive(Serialize, Deserialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: ErrorBody,
}

#[derive(Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

fn error_response(
    status: StatusCode,
    code: &str,
    message: impl Into<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            ok: false,
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
            },
        }),
    )
}

// ── Handlers ──────────────────────────────────────────────────────────────

/// `POST /send` — validate, then publish along the addressed fan-out path.
///
/// Error mapping: unparseable body ⇒ 400, schema/address violations ⇒ 422,
/// bus down after bounded retry ⇒ 503. The gateway keeps client-supplied
/// ids verbatim and never deduplicates.
async fn send_handler(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<SendResponse>, (StatusCode, Json<ErrorResponse>)> {
    let value: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, "bad_json", e.to_string()))?;

    let mut envelope: Envelope = serde_json::from_value(value).map_err(|e| {
        error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "bad_envelope",
            e.to_string(),
        )
    })?;
    if envelope.id.trim().is_empty() {
        envelope.id = uuid::Uuid::new_v4().to_string();
    }
    envelope.validate().map_err(|e| {
        error_response(StatusCode::UNPROCESSABLE_ENTITY, e.code(), e.to_string())
    })?;

    let published_to = publish_with_retry(state.bus.as_ref(), &envelope)
        .await
        .map_err(|e| {
            warn!(error = %e, id = %envelope.id, "ingress publish failed");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "bus_unavailable", e.to_string())
        })?;

    info!(
        id = %envelope.id,
        conversation_id = %envelope.conversation_id,
        topics = ?published_to,
        "envelope accepted"
    );

    // Mirror the inbound message onto the conversation stream so observers
    // see it without tailing the chat topic. Best-effort: the inbound
    // publish already happened.
    let user_event = StreamEvent::UserMessage {
        conversation_id: envelope.conversation_id.clone(),
        sender: envelope.sender.clone(),
        text: envelope.content.clone().unwrap_or_default(),
        created_at: envelope.created_at,
    };
    if let Err(e) = publish_event(state.bus.as_ref(), &user_event).await {
        warn!(error = %e, "user_message stream echo failed");
    }

    Ok(Json(SendResponse {
        ok: true,
        id: envelope.id,
        published_to,
    }))
}

async fn publish_with_retry(
    bus: &dyn Bus,
    envelope: &Envelope,
) -> Result<Vec<String>, hivebus_core::error::BusError> {
    let mut delay = PUBLISH_BACKOFF_START;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match publish_envelope(bus, envelope).await {
            Ok(topics) => return Ok(topics),
            Err(e) if attempt < PUBLISH_ATTEMPTS => {
                warn!(error = %e, attempt, "ingress publish failed, retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(PUBLISH_BACKOFF_CAP);
            }
            Err(e) => return Err(e),
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true })
}

async fn ready_handler(
    State(state): State<SharedState>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<ErrorResponse>)> {
    state.bus.probe().await.map_err(|e| {
        error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "bus_unavailable",
            e.to_string(),
        )
    })?;
    Ok(Json(HealthResponse { ok: true }))
}
