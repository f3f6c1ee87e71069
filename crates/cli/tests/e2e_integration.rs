//! End-to-end integration tests for the hivebus runtime.
//!
//! These exercise the full pipeline: HTTP ingress through the bus, the
//! worker/runner loop, the SSE egress, and the orchestration fan-out with
//! signal fan-in — all over the in-memory bus with the echo runner.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use tokio::sync::watch;
use tower::ServiceExt;

use hivebus_bus::{Bus, BusEntry, BusMessage, GroupIdentity, MemoryBus};
use hivebus_core::envelope::Envelope;
use hivebus_core::error::BusError;
use hivebus_core::event::StreamEvent;
use hivebus_gateway::{build_router, GatewayState};
use hivebus_orchestrate::{orchestrate_split, OrchestrateRequest};
use hivebus_signals::SignalHub;
use hivebus_worker::{EchoRunner, Worker};

// ── Harness ──────────────────────────────────────────────────────────────

fn gateway_over(store: &MemoryBus) -> axum::Router {
    build_router(Arc::new(GatewayState {
        bus: Arc::new(store.clone()),
        max_events: None,
    }))
}

fn worker_for(store: &MemoryBus, agent: &str) -> Worker {
    let grouped = store.clone().with_group(GroupIdentity::for_agent(agent));
    Worker::new(agent, Arc::new(grouped), Arc::new(EchoRunner))
}

fn send_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/send")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn stream_events(store: &MemoryBus, conversation_id: &str) -> Vec<(String, StreamEvent)> {
    store
        .read(&format!("stream:{conversation_id}"), None, 100, 0)
        .await
        .unwrap()
        .into_iter()
        .map(|e| {
            let event = serde_json::from_value(e.message.payload).unwrap();
            (e.cursor, event)
        })
        .collect()
}

// ── Scenario: single message round-trip ──────────────────────────────────

#[tokio::test]
async fn e2e_single_message_round_trip() {
    let store = MemoryBus::new();
    let app = gateway_over(&store);
    let worker = worker_for(&store, "A");

    let response = app
        .oneshot(send_request(
            r#"{"id":"e1","conversation_id":"c1","sender":"user:u","recipient":"agent:A","type":"message","content":"hi"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(worker.process_available(10).await.unwrap(), 1);

    let events = stream_events(&store, "c1").await;
    // user_message echo from ingress, then the run: token, token, output.
    let names: Vec<&str> = events.iter().map(|(_, e)| e.event_name()).collect();
    assert_eq!(names, vec!["user_message", "token", "token", "output"]);

    match (&events[1].1, &events[2].1, &events[3].1) {
        (
            StreamEvent::Token { text: t0, index: 0, .. },
            StreamEvent::Token { text: t1, index: 1, .. },
            StreamEvent::Output { text, .. },
        ) => {
            assert_eq!(t0, "h");
            assert_eq!(t1, "i");
            assert_eq!(text, "hi");
        }
        other => panic!("unexpected events: {other:?}"),
    }

    // SSE ids (bus cursors) are strictly increasing.
    let cursors: Vec<&String> = events.iter().map(|(c, _)| c).collect();
    assert!(cursors.windows(2).all(|w| w[0] < w[1]));
}

// ── Scenario: token reconstruction property ──────────────────────────────

#[tokio::test]
async fn e2e_token_concatenation_equals_output() {
    let store = MemoryBus::new();
    let app = gateway_over(&store);
    let worker = worker_for(&store, "A");

    let content = "The quick brown fox — streaming edition.";
    let body = serde_json::json!({
        "conversation_id": "c-tokens",
        "sender": "user:u",
        "recipient": "agent:A",
        "type": "message",
        "content": content,
    });
    app.oneshot(send_request(&body.to_string())).await.unwrap();
    worker.process_available(10).await.unwrap();

    let mut assembled = String::new();
    let mut final_text = None;
    for (_, event) in stream_events(&store, "c-tokens").await {
        match event {
            StreamEvent::Token { text, .. } => assembled.push_str(&text),
            StreamEvent::Output { text, .. } => final_text = Some(text),
            _ => {}
        }
    }
    assert_eq!(assembled, content);
    assert_eq!(final_text.as_deref(), Some(content));
}

// ── Scenario: SSE resume across reconnects ───────────────────────────────

#[tokio::test]
async fn e2e_sse_resume_skips_already_seen_events() {
    let store = MemoryBus::new();
    let worker = worker_for(&store, "A");

    gateway_over(&store)
        .oneshot(send_request(
            r#"{"conversation_id":"c1","sender":"user:u","recipient":"agent:A","type":"message","content":"hey"}"#,
        ))
        .await
        .unwrap();
    worker.process_available(10).await.unwrap();

    // First subscriber reads two events, then "disconnects".
    let first = gateway_over(&store)
        .oneshot(
            Request::builder()
                .uri("/stream/c1?since=0&max_events=2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let first_body = body_text(first).await;
    let last_seen = first_body
        .lines()
        .filter_map(|l| l.strip_prefix("id: "))
        .last()
        .expect("id lines present")
        .to_string();

    // Reconnect with Last-Event-ID; only later events may appear. The
    // stream holds four events total, so exactly two remain.
    let second = gateway_over(&store)
        .oneshot(
            Request::builder()
                .uri("/stream/c1?max_events=2")
                .header("Last-Event-ID", last_seen.clone())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let second_body = body_text(second).await;

    for line in first_body.lines().filter_map(|l| l.strip_prefix("id: ")) {
        assert!(
            !second_body.contains(&format!("id: {line}")),
            "event {line} was replayed after resume"
        );
    }
    assert!(second_body.contains(r#""event":"output""#));
}

// ── Scenario: agent addressing fan-out ───────────────────────────────────

#[tokio::test]
async fn e2e_agent_fanout_group_consumes_once_observer_sees_all() {
    let store = MemoryBus::new();
    let app = gateway_over(&store);

    let response = app
        .oneshot(send_request(
            r#"{"conversation_id":"c1","sender":"user:u","recipient":"agent:A","type":"message","content":"hi"}"#,
        ))
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["published_to"], serde_json::json!(["chat:c1", "chat:A"]));

    // Two workers share one group: exactly one consumes the envelope.
    let worker_one = worker_for(&store, "A");
    let worker_two = worker_for(&store, "A");
    let consumed = worker_one.process_available(10).await.unwrap()
        + worker_two.process_available(10).await.unwrap();
    assert_eq!(consumed, 1);

    // A passive subscriber on the conversation topic still sees it.
    let observed = store.read("chat:c1", None, 10, 0).await.unwrap();
    assert_eq!(observed.len(), 1);
    let envelope: Envelope = serde_json::from_value(observed[0].message.payload.clone()).unwrap();
    assert_eq!(envelope.recipient, "agent:A");
}

// ── Scenario: orchestration fan-out with signal fan-in ───────────────────

#[tokio::test]
async fn e2e_orchestrate_children_complete_via_signals() {
    let store = MemoryBus::new();
    let signals = SignalHub::new(Arc::new(store.clone()));

    // Worker with auto-done enabled serves the children.
    let grouped = store.clone().with_group(GroupIdentity::for_agent("DevAgent"));
    let worker_signals = Arc::new(SignalHub::new(Arc::new(store.clone())));
    let worker = Worker::new("DevAgent", Arc::new(grouped), Arc::new(EchoRunner))
        .with_block_ms(20)
        .with_auto_done(worker_signals);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_task = tokio::spawn(async move { worker.run(shutdown_rx).await });

    let result = orchestrate_split(
        &store,
        &signals,
        OrchestrateRequest::new("summarize the logs", 2, "DevAgent").with_wait(5_000),
    )
    .await
    .unwrap();

    shutdown_tx.send(true).unwrap();
    worker_task.await.unwrap();

    assert!(result.ok, "barrier should resolve: {result:?}");
    let barrier = result.wait.unwrap();
    assert!(barrier.ok);
    assert_eq!(barrier.cursors.len(), 2);

    // Every child conversation ran to a terminal output.
    for child in &result.children {
        let events = stream_events(&store, &child.conversation_id).await;
        assert!(
            events.iter().any(|(_, e)| e.is_terminal()),
            "child {} produced no output",
            child.conversation_id
        );
    }
}

// ── Scenario: idle worker backpressure ───────────────────────────────────

/// Bus wrapper that counts reads so idle behavior is observable.
struct CountingBus {
    inner: MemoryBus,
    reads: AtomicU64,
}

#[async_trait]
impl Bus for CountingBus {
    async fn publish(&self, topic: &str, message: BusMessage) -> Result<String, BusError> {
        self.inner.publish(topic, message).await
    }

    async fn read(
        &self,
        topic: &str,
        last_cursor: Option<&str>,
        limit: usize,
        block_ms: u64,
    ) -> Result<Vec<BusEntry>, BusError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.inner.read(topic, last_cursor, limit, block_ms).await
    }

    async fn ack(&self, topic: &str, cursor: &str) -> Result<(), BusError> {
        self.inner.ack(topic, cursor).await
    }

    async fn probe(&self) -> Result<(), BusError> {
        self.inner.probe().await
    }

    fn earliest_cursor(&self) -> &'static str {
        self.inner.earliest_cursor()
    }
}

#[tokio::test]
async fn e2e_idle_worker_suspends_instead_of_spinning() {
    let store = MemoryBus::new();
    let counting = Arc::new(CountingBus {
        inner: store.clone().with_group(GroupIdentity::for_agent("A")),
        reads: AtomicU64::new(0),
    });

    let worker = Worker::new("A", counting.clone(), Arc::new(EchoRunner)).with_block_ms(50);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(async move { worker.run(shutdown_rx).await });

    tokio::time::sleep(Duration::from_millis(400)).await;
    shutdown_tx.send(true).unwrap();
    task.await.unwrap();

    // With 50ms blocking reads over ~400ms, a suspending worker performs on
    // the order of 8 reads; a spinning one would do thousands.
    let reads = counting.reads.load(Ordering::Relaxed);
    assert!(reads >= 2, "worker never polled");
    assert!(reads <= 30, "worker busy-looped: {reads} reads in 400ms");
}

// ── Scenario: duplicate envelope ids stay recognizable end to end ────────

#[tokio::test]
async fn e2e_duplicate_envelope_ids_surface_to_readers() {
    let store = MemoryBus::new();

    let body = r#"{"id":"dup","conversation_id":"c1","sender":"user:u","recipient":"chat:c1","type":"message","content":"hi"}"#;
    for _ in 0..2 {
        gateway_over(&store)
            .oneshot(send_request(body))
            .await
            .unwrap();
    }

    let entries = store.read("chat:c1", None, 10, 0).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].message.id, "dup");
    assert_eq!(entries[1].message.id, "dup");
    assert!(entries[0].cursor < entries[1].cursor);
}
