//! # hivebus Signals
//!
//! Named, cursor-addressed coordination channels carried on the bus
//! (`signal:<scope>/<event>` topics), with policy enforcement and
//! visibility events.
//!
//! Signals are at-least-once and per-topic ordered (both inherited from the
//! bus). Consumers that care about idempotency must de-duplicate by
//! `message_id`. Waits poll with a short cadence and a caller-provided
//! deadline; a timeout is a structured non-ok result, never an error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use hivebus_bus::{Bus, BusMessage};
use hivebus_core::error::SignalError;
use hivebus_core::event::StreamEvent;
use hivebus_core::redact::redact_sensitive;

/// Delay between polls inside multi-topic waits.
const POLL_INTERVAL: Duration = Duration::from_millis(30);

/// Default rejection cap for signal payloads.
const DEFAULT_PAYLOAD_MAX_BYTES: usize = 16 * 1024;

/// Policy applied to every signal send and wait.
#[derive(Debug, Clone)]
pub struct SignalPolicy {
    /// Required topic prefix; `None` allows all topics.
    pub topic_prefix: Option<String>,
    /// Serialized payload size cap in bytes.
    pub payload_max_bytes: usize,
}

impl Default for SignalPolicy {
    fn default() -> Self {
        Self {
            topic_prefix: None,
            payload_max_bytes: DEFAULT_PAYLOAD_MAX_BYTES,
        }
    }
}

impl SignalPolicy {
    /// Restrict sends and waits to topics under `prefix`.
    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.topic_prefix = (!prefix.is_empty()).then_some(prefix);
        self
    }

    pub fn with_payload_max_bytes(mut self, cap: usize) -> Self {
        self.payload_max_bytes = cap;
        self
    }

    fn check_topic(&self, topic: &str) -> Result<(), SignalError> {
        let name = topic.trim();
        if name.is_empty() {
            return Err(SignalError::InvalidTopic("topic must be non-empty".into()));
        }
        if let Some(prefix) = &self.topic_prefix {
            if !name.starts_with(prefix.as_str()) {
                return Err(SignalError::PolicyViolation {
                    topic: name.to_string(),
                    prefix: prefix.clone(),
                });
            }
        }
        Ok(())
    }

    fn check_payload(&self, payload: &serde_json::Value) -> Result<usize, SignalError> {
        let size = serde_json::to_string(payload).map(|s| s.len()).unwrap_or(0);
        if size > self.payload_max_bytes {
            return Err(SignalError::PayloadTooLarge {
                size,
                cap: self.payload_max_bytes,
            });
        }
        Ok(size)
    }
}

/// Result of a successful signal send.
#[derive(Debug, Clone, Serialize)]
pub struct SignalSendResult {
    pub ok: bool,
    pub topic: String,
    pub cursor: String,
    pub message_id: String,
}

/// Result of a single- or any-wait. `ok: false` means the deadline passed.
#[derive(Debug, Clone, Serialize)]
pub struct SignalWaitResult {
    pub ok: bool,
    /// Which topic fired (meaningful for `wait_any`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl SignalWaitResult {
    fn timed_out(timeout_ms: u64) -> Self {
        Self {
            ok: false,
            topic: None,
            message: None,
            message_id: None,
            cursor: None,
            timeout_ms: Some(timeout_ms),
        }
    }
}

/// Result of a barrier wait across several topics.
#[derive(Debug, Clone, Serialize)]
pub struct SignalWaitAllResult {
    pub ok: bool,
    /// Topic → cursor of the entry that satisfied it.
    pub cursors: HashMap<String, String>,
    /// Topics still unsatisfied when the deadline passed.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pending: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Coordination layer over the bus.
///
/// Stateless beyond its bus handle and policy; cursors live with callers.
pub struct SignalHub {
    bus: Arc<dyn Bus>,
    policy: SignalPolicy,
}

impl SignalHub {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self {
            bus,
            policy: SignalPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: SignalPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Publish a small JSON payload on a signal topic.
    ///
    /// When the caller's conversation is known, a `signal_send` visibility
    /// event (topic, cursor, payload length — never the payload) is also
    /// published on that conversation's stream, best-effort.
    pub async fn send(
        &self,
        topic: &str,
        payload: serde_json::Value,
        conversation_id: Option<&str>,
    ) -> Result<SignalSendResult, SignalError> {
        self.policy.check_topic(topic)?;
        let payload_bytes = self.policy.check_payload(&payload)?;

        let message = BusMessage::new(serde_json::json!({
            "event": "signal",
            "payload": payload,
        }));
        let message_id = message.id.clone();
        let cursor = self.bus.publish(topic, message).await?;
        debug!(topic = %topic, cursor = %cursor, "signal sent");

        if let Some(conversation_id) = conversation_id {
            self.publish_visibility(StreamEvent::SignalSent {
                conversation_id: conversation_id.to_string(),
                topic: topic.to_string(),
                cursor: cursor.clone(),
                payload_bytes,
            })
            .await;
        }

        Ok(SignalSendResult {
            ok: true,
            topic: topic.to_string(),
            cursor,
            message_id,
        })
    }

    /// Wait for the first entry strictly after `last_cursor` (or the most
    /// recent entry when no cursor is supplied), up to `timeout_ms`.
    pub async fn wait(
        &self,
        topic: &str,
        last_cursor: Option<&str>,
        timeout_ms: u64,
        conversation_id: Option<&str>,
    ) -> Result<SignalWaitResult, SignalError> {
        self.policy.check_topic(topic)?;

        let deadline = Instant::now() + Duration::from_millis(timeout_ms.max(1));
        loop {
            let batch = self.bus.read(topic, last_cursor, 1, 0).await?;
            if let Some(entry) = batch.into_iter().next() {
                return Ok(self
                    .received(topic, entry.cursor, entry.message, conversation_id)
                    .await);
            }
            if Instant::now() >= deadline {
                return Ok(SignalWaitResult::timed_out(timeout_ms));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Wait for the first entry across a set of topics, reporting which
    /// topic fired.
    pub async fn wait_any(
        &self,
        topics: &[String],
        last_cursors: &HashMap<String, String>,
        timeout_ms: u64,
        conversation_id: Option<&str>,
    ) -> Result<SignalWaitResult, SignalError> {
        for topic in topics {
            self.policy.check_topic(topic)?;
        }

        let deadline = Instant::now() + Duration::from_millis(timeout_ms.max(1));
        loop {
            for topic in topics {
                let cursor = last_cursors.get(topic).map(String::as_str);
                let batch = self.bus.read(topic, cursor, 1, 0).await?;
                if let Some(entry) = batch.into_iter().next() {
                    return Ok(self
                        .received(topic, entry.cursor, entry.message, conversation_id)
                        .await);
                }
            }
            if Instant::now() >= deadline {
                return Ok(SignalWaitResult::timed_out(timeout_ms));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Barrier: resolve once every topic has produced at least one new
    /// entry, or time out with the partial cursor map.
    pub async fn wait_all(
        &self,
        topics: &[String],
        last_cursors: &HashMap<String, String>,
        timeout_ms: u64,
        conversation_id: Option<&str>,
    ) -> Result<SignalWaitAllResult, SignalError> {
        for topic in topics {
            self.policy.check_topic(topic)?;
        }

        let deadline = Instant::now() + Duration::from_millis(timeout_ms.max(1));
        let mut fired: HashMap<String, String> = HashMap::new();

        loop {
            for topic in topics {
                if fired.contains_key(topic) {
                    continue;
                }
                let cursor = last_cursors.get(topic).map(String::as_str);
                let batch = self.bus.read(topic, cursor, 1, 0).await?;
                if let Some(entry) = batch.into_iter().next() {
                    self.received(topic, entry.cursor.clone(), entry.message, conversation_id)
                        .await;
                    fired.insert(topic.clone(), entry.cursor);
                }
            }
            if fired.len() == topics.len() {
                return Ok(SignalWaitAllResult {
                    ok: true,
                    cursors: fired,
                    pending: Vec::new(),
                    timeout_ms: None,
                });
            }
            if Instant::now() >= deadline {
                let pending = topics
                    .iter()
                    .filter(|t| !fired.contains_key(*t))
                    .cloned()
                    .collect();
                return Ok(SignalWaitAllResult {
                    ok: false,
                    cursors: fired,
                    pending,
                    timeout_ms: Some(timeout_ms),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Redact the received payload, publish the `signal_recv` visibility
    /// event when a conversation is known, and shape the wait result.
    async fn received(
        &self,
        topic: &str,
        cursor: String,
        message: BusMessage,
        conversation_id: Option<&str>,
    ) -> SignalWaitResult {
        let mut payload = message.payload;
        let payload_bytes = serde_json::to_string(&payload).map(|s| s.len()).unwrap_or(0);
        redact_sensitive(&mut payload);

        if let Some(conversation_id) = conversation_id {
            self.publish_visibility(StreamEvent::SignalReceived {
                conversation_id: conversation_id.to_string(),
                topic: topic.to_string(),
                cursor: cursor.clone(),
                payload_bytes,
            })
            .await;
        }

        SignalWaitResult {
            ok: true,
            topic: Some(topic.to_string()),
            message: Some(payload),
            message_id: Some(message.id),
            cursor: Some(cursor),
            timeout_ms: None,
        }
    }

    /// Visibility events never fail the signal operation itself.
    async fn publish_visibility(&self, event: StreamEvent) {
        if let Err(e) = hivebus_bus::publish_event(self.bus.as_ref(), &event).await {
            warn!(error = %e, "signal visibility publish failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hivebus_bus::MemoryBus;

    fn hub() -> (Arc<MemoryBus>, SignalHub) {
        let bus = Arc::new(MemoryBus::new());
        let hub = SignalHub::new(bus.clone());
        (bus, hub)
    }

    #[tokio::test]
    async fn send_then_wait_roundtrip() {
        let (_bus, hub) = hub();

        let sent = hub
            .send("signal:teamA/done", serde_json::json!({"n": 1}), None)
            .await
            .unwrap();
        assert!(sent.ok);
        assert!(!sent.cursor.is_empty());

        let got = hub.wait("signal:teamA/done", None, 500, None).await.unwrap();
        assert!(got.ok);
        assert_eq!(got.topic.as_deref(), Some("signal:teamA/done"));
        assert_eq!(got.message.unwrap()["payload"]["n"], 1);
        assert_eq!(got.message_id.as_deref(), Some(sent.message_id.as_str()));
    }

    #[tokio::test]
    async fn wait_timeout_is_structured_not_an_error() {
        let (_bus, hub) = hub();
        let got = hub.wait("signal:empty", None, 80, None).await.unwrap();
        assert!(!got.ok);
        assert_eq!(got.timeout_ms, Some(80));
        assert!(got.message.is_none());
    }

    #[tokio::test]
    async fn prefix_policy_rejects_without_bus_write() {
        let bus = Arc::new(MemoryBus::new());
        let hub = SignalHub::new(bus.clone())
            .with_policy(SignalPolicy::default().with_topic_prefix("signal:"));

        let err = hub
            .send("chat:foo", serde_json::json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SignalError::PolicyViolation { .. }));

        // Nothing was published anywhere.
        assert!(bus.read("chat:foo", None, 10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected() {
        let bus = Arc::new(MemoryBus::new());
        let hub = SignalHub::new(bus.clone())
            .with_policy(SignalPolicy::default().with_payload_max_bytes(16));

        let err = hub
            .send(
                "signal:big",
                serde_json::json!({"blob": "x".repeat(64)}),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SignalError::PayloadTooLarge { .. }));
    }

    #[tokio::test]
    async fn received_payloads_are_redacted() {
        let (_bus, hub) = hub();
        hub.send(
            "signal:creds",
            serde_json::json!({"api_key": "sk-123", "note": "ok"}),
            None,
        )
        .await
        .unwrap();

        let got = hub.wait("signal:creds", None, 500, None).await.unwrap();
        let message = got.message.unwrap();
        assert_eq!(message["payload"]["api_key"], "***REDACTED***");
        assert_eq!(message["payload"]["note"], "ok");
    }

    #[tokio::test]
    async fn wait_any_reports_the_firing_topic() {
        let (_bus, hub) = hub();
        let topics = vec!["signal:a/done".to_string(), "signal:b/done".to_string()];

        hub.send("signal:b/done", serde_json::json!({}), None)
            .await
            .unwrap();

        let got = hub
            .wait_any(&topics, &HashMap::new(), 500, None)
            .await
            .unwrap();
        assert!(got.ok);
        assert_eq!(got.topic.as_deref(), Some("signal:b/done"));
    }

    #[tokio::test]
    async fn wait_all_barrier_resolves_when_every_topic_fires() {
        let (_bus, hub) = hub();
        let topics = vec!["signal:teamA/done".to_string(), "signal:teamB/done".to_string()];

        hub.send("signal:teamA/done", serde_json::json!({}), None)
            .await
            .unwrap();
        hub.send("signal:teamB/done", serde_json::json!({}), None)
            .await
            .unwrap();

        let got = hub
            .wait_all(&topics, &HashMap::new(), 1_000, None)
            .await
            .unwrap();
        assert!(got.ok);
        assert_eq!(got.cursors.len(), 2);
        assert!(got.cursors.contains_key("signal:teamA/done"));
        assert!(got.cursors.contains_key("signal:teamB/done"));
    }

    #[tokio::test]
    async fn wait_all_times_out_when_one_topic_is_silent() {
        let (_bus, hub) = hub();
        let topics = vec!["signal:teamA/done".to_string(), "signal:teamB/done".to_string()];

        hub.send("signal:teamA/done", serde_json::json!({}), None)
            .await
            .unwrap();

        let got = hub
            .wait_all(&topics, &HashMap::new(), 100, None)
            .await
            .unwrap();
        assert!(!got.ok);
        assert_eq!(got.pending, vec!["signal:teamB/done".to_string()]);
        assert_eq!(got.cursors.len(), 1);
        assert_eq!(got.timeout_ms, Some(100));
    }

    #[tokio::test]
    async fn send_and_receive_publish_visibility_events() {
        let (bus, hub) = hub();

        hub.send("signal:vis/done", serde_json::json!({"k": 1}), Some("c1"))
            .await
            .unwrap();
        hub.wait("signal:vis/done", None, 500, Some("c1"))
            .await
            .unwrap();

        let stream = bus.read("stream:c1", None, 10, 0).await.unwrap();
        let names: Vec<_> = stream
            .iter()
            .map(|e| e.message.payload["event"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["signal_send", "signal_recv"]);
        // Visibility carries length only, never the payload.
        assert!(stream[0].message.payload.get("payload").is_none());
        assert!(stream[0].message.payload["payload_bytes"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn wait_respects_last_cursor() {
        let (_bus, hub) = hub();
        let first = hub
            .send("signal:seq", serde_json::json!({"n": 1}), None)
            .await
            .unwrap();
        hub.send("signal:seq", serde_json::json!({"n": 2}), None)
            .await
            .unwrap();

        let got = hub
            .wait("signal:seq", Some(&first.cursor), 500, None)
            .await
            .unwrap();
        assert!(got.ok);
        assert_eq!(got.message.unwrap()["payload"]["n"], 2);
    }
}
