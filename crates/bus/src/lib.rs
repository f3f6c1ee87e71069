//! # hivebus Bus
//!
//! Typed, at-least-once, ordered, cursor-addressable publish/read for named
//! topics, with an optional consumer-group mode for horizontally-scaled
//! subscribers.
//!
//! Two backends share one interface:
//! - [`MemoryBus`] — pure in-process, for single-process mode and tests.
//! - [`RedisBus`] — Redis Streams with consumer groups, for production.
//!
//! Cursors are opaque strings assigned by the backend. Callers never parse
//! them; they only hand them back to `read` to resume.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use hivebus_core::envelope::Envelope;
use hivebus_core::error::BusError;
use hivebus_core::event::StreamEvent;
use hivebus_core::topic;

pub use self::memory::MemoryBus;
pub use self::redis::RedisBus;

/// The unit stored on a topic: a canonical id plus a JSON payload.
///
/// The id is generated once at creation and survives transport hops, so
/// readers can recognize duplicates after redelivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    pub id: String,
    pub payload: serde_json::Value,
}

impl BusMessage {
    /// Wrap a JSON payload with a fresh canonical id.
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            payload,
        }
    }

    /// Serialize an envelope into a bus message, reusing the envelope's id
    /// as the canonical id so duplicates stay recognizable end to end.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, BusError> {
        let payload = serde_json::to_value(envelope)
            .map_err(|e| BusError::Unavailable(format!("envelope encode failed: {e}")))?;
        Ok(Self {
            id: envelope.id.clone(),
            payload,
        })
    }

    /// Serialize a stream event into a bus message.
    pub fn from_event(event: &StreamEvent) -> Result<Self, BusError> {
        let payload = serde_json::to_value(event)
            .map_err(|e| BusError::Unavailable(format!("event encode failed: {e}")))?;
        Ok(Self::new(payload))
    }
}

/// One entry as returned by a read: the backend-assigned cursor plus the
/// stored message.
#[derive(Debug, Clone)]
pub struct BusEntry {
    pub cursor: String,
    pub message: BusMessage,
}

/// Consumer-group identity, supplied at bus construction.
///
/// The group name is stable per agent; the consumer name is unique per
/// process so the backend can partition delivery.
#[derive(Debug, Clone)]
pub struct GroupIdentity {
    pub group: String,
    pub consumer: String,
}

impl GroupIdentity {
    /// Conventional group identity for an agent's worker fleet.
    pub fn for_agent(agent_name: &str) -> Self {
        Self {
            group: format!("workers:{agent_name}"),
            consumer: format!("consumer-{}", Uuid::new_v4()),
        }
    }
}

/// Minimal pluggable bus interface.
///
/// Kept tiny and stable so transports can be swapped without touching
/// callers. All operations are async; blocking backends offload internally.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Append one message to a topic. Returns the new entry's cursor.
    async fn publish(&self, topic: &str, message: BusMessage) -> Result<String, BusError>;

    /// Read up to `limit` entries strictly after `last_cursor`, or from the
    /// end of the topic when absent. With `block_ms > 0`, waits up to that
    /// long for entries before returning an empty batch. In group mode only
    /// never-delivered (or claim-expired) entries are returned and the
    /// caller must subsequently [`ack`](Bus::ack).
    async fn read(
        &self,
        topic: &str,
        last_cursor: Option<&str>,
        limit: usize,
        block_ms: u64,
    ) -> Result<Vec<BusEntry>, BusError>;

    /// Mark an entry processed in consumer-group mode. No-op outside groups.
    async fn ack(&self, topic: &str, cursor: &str) -> Result<(), BusError>;

    /// Lightweight liveness check for readiness probes.
    async fn probe(&self) -> Result<(), BusError>;

    /// A cursor sorting before every entry the backend can hold. Reading
    /// strictly after it replays a topic from its earliest retained entry.
    fn earliest_cursor(&self) -> &'static str;
}

/// Publish an envelope along the ingress fan-out path: always the
/// conversation topic, additionally the agent topic when the recipient
/// addresses an agent. Returns the topics written, in publish order.
///
/// This is the single publish path shared by the gateway and the
/// orchestration helper, so addressed fan-out behaves identically whether a
/// message arrives over HTTP or from a parent agent.
pub async fn publish_envelope(bus: &dyn Bus, envelope: &Envelope) -> Result<Vec<String>, BusError> {
    let message = BusMessage::from_envelope(envelope)?;
    let topics = topic::publish_topics(&envelope.recipient, &envelope.conversation_id);
    for t in &topics {
        bus.publish(t, message.clone()).await?;
    }
    Ok(topics)
}

/// Publish a stream event onto its conversation's egress topic.
pub async fn publish_event(bus: &dyn Bus, event: &StreamEvent) -> Result<String, BusError> {
    let message = BusMessage::from_event(event)?;
    bus.publish(&topic::stream_for(event.conversation_id()), message)
        .await
}

/// Build a bus from a backend URL: `redis://…` selects [`RedisBus`],
/// empty/absent selects [`MemoryBus`].
pub async fn from_url(
    url: Option<&str>,
    group: Option<GroupIdentity>,
) -> Result<Arc<dyn Bus>, BusError> {
    match url.map(str::trim).filter(|u| !u.is_empty()) {
        Some(url) => {
            let mut bus = RedisBus::connect(url).await?;
            if let Some(group) = group {
                bus = bus.with_group(group);
            }
            Ok(Arc::new(bus))
        }
        None => {
            let mut bus = MemoryBus::new();
            if let Some(group) = group {
                bus = bus.with_group(group);
            }
            Ok(Arc::new(bus))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_envelope_fans_out_for_agent_recipient() {
        let bus = MemoryBus::new();
        let env = Envelope::message("c1", "user:u", "agent:A", "hi");

        let topics = publish_envelope(&bus, &env).await.unwrap();
        assert_eq!(topics, vec!["chat:c1".to_string(), "chat:A".to_string()]);

        // Both topics carry the same canonical id.
        let conv = bus.read("chat:c1", None, 10, 0).await.unwrap();
        let agent = bus.read("chat:A", None, 10, 0).await.unwrap();
        assert_eq!(conv.len(), 1);
        assert_eq!(agent.len(), 1);
        assert_eq!(conv[0].message.id, env.id);
        assert_eq!(agent[0].message.id, env.id);
    }

    #[tokio::test]
    async fn publish_event_targets_the_stream_topic() {
        let bus = MemoryBus::new();
        let ev = StreamEvent::token("c9", "x", 0);
        publish_event(&bus, &ev).await.unwrap();

        let got = bus.read("stream:c9", None, 10, 0).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].message.payload["event"], "token");
    }

    #[tokio::test]
    async fn from_url_defaults_to_memory() {
        let bus = from_url(None, None).await.unwrap();
        bus.probe().await.unwrap();

        let bus = from_url(Some("   "), None).await.unwrap();
        bus.probe().await.unwrap();
    }

    #[test]
    fn group_identity_for_agent_is_stable_group_unique_consumer() {
        let a = GroupIdentity::for_agent("DevAgent");
        let b = GroupIdentity::for_agent("DevAgent");
        assert_eq!(a.group, "workers:DevAgent");
        assert_eq!(a.group, b.group);
        assert_ne!(a.consumer, b.consumer);
    }
}
