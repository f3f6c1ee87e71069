//! Stream events — the records emitted on a conversation's egress topic
//! during a run.
//!
//! Events are a tagged sum (discriminated by `event`) so the gateway can
//! forward them to SSE clients without knowing every variant, and so
//! decoders tolerate variants added later.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Events emitted during an agent run, plus the visibility records the
/// gateway and signal layer mirror onto conversation streams.
///
/// Wire discriminators:
/// - `token`       — partial text from the runner, ordered by `index`
/// - `tool_step`   — tool invocation or completion
/// - `output`      — terminal event of a run; full assistant reply
/// - `log`         — diagnostic passthrough
/// - `user_message` — inbound message echoed to stream observers
/// - `signal_send` / `signal_recv` — signal visibility (never full payloads)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Partial text from the runner; `index` is monotone within one run and
    /// the concatenation of all token texts in index order equals the final
    /// output text.
    Token {
        conversation_id: String,
        text: String,
        index: u64,
    },

    /// A tool invocation or completion. Completions carry `result_summary`.
    ToolStep {
        conversation_id: String,
        name: String,
        #[serde(default)]
        args: serde_json::Map<String, serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result_summary: Option<String>,
    },

    /// The terminal event of a run.
    Output {
        conversation_id: String,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<serde_json::Value>,
    },

    /// Diagnostic passthrough (runner logs, gateway warnings).
    Log {
        conversation_id: String,
        level: String,
        component: String,
        message: String,
    },

    /// Published by ingress so stream observers see the inbound message
    /// without subscribing to the chat topic.
    UserMessage {
        conversation_id: String,
        sender: String,
        text: String,
        created_at: DateTime<Utc>,
    },

    /// A signal was sent from within this conversation. Carries the signal
    /// topic, the bus cursor, and the payload length — never the payload.
    #[serde(rename = "signal_send")]
    SignalSent {
        conversation_id: String,
        topic: String,
        cursor: String,
        payload_bytes: usize,
    },

    /// A signal was received within this conversation.
    #[serde(rename = "signal_recv")]
    SignalReceived {
        conversation_id: String,
        topic: String,
        cursor: String,
        payload_bytes: usize,
    },
}

impl StreamEvent {
    /// The conversation this event belongs to.
    pub fn conversation_id(&self) -> &str {
        match self {
            Self::Token { conversation_id, .. }
            | Self::ToolStep { conversation_id, .. }
            | Self::Output { conversation_id, .. }
            | Self::Log { conversation_id, .. }
            | Self::UserMessage { conversation_id, .. }
            | Self::SignalSent { conversation_id, .. }
            | Self::SignalReceived { conversation_id, .. } => conversation_id,
        }
    }

    /// Wire discriminator for this event.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Token { .. } => "token",
            Self::ToolStep { .. } => "tool_step",
            Self::Output { .. } => "output",
            Self::Log { .. } => "log",
            Self::UserMessage { .. } => "user_message",
            Self::SignalSent { .. } => "signal_send",
            Self::SignalReceived { .. } => "signal_recv",
        }
    }

    /// Whether this event terminates a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Output { .. })
    }

    /// Shorthand for a token event.
    pub fn token(conversation_id: impl Into<String>, text: impl Into<String>, index: u64) -> Self {
        Self::Token {
            conversation_id: conversation_id.into(),
            text: text.into(),
            index,
        }
    }

    /// Shorthand for a terminal output event without usage.
    pub fn output(conversation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Output {
            conversation_id: conversation_id.into(),
            text: text.into(),
            usage: None,
        }
    }

    /// Shorthand for a log event.
    pub fn log(
        conversation_id: impl Into<String>,
        level: impl Into<String>,
        component: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Log {
            conversation_id: conversation_id.into(),
            level: level.into(),
            component: component.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_serialization_uses_event_tag() {
        let ev = StreamEvent::token("c1", "he", 0);
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains(r#""event":"token""#));
        assert!(json.contains(r#""index":0"#));
    }

    #[test]
    fn output_is_terminal_others_are_not() {
        assert!(StreamEvent::output("c1", "done").is_terminal());
        assert!(!StreamEvent::token("c1", "x", 0).is_terminal());
        assert!(!StreamEvent::log("c1", "info", "runner", "m").is_terminal());
    }

    #[test]
    fn signal_visibility_wire_names() {
        let sent = StreamEvent::SignalSent {
            conversation_id: "c1".into(),
            topic: "signal:teamA/done".into(),
            cursor: "0-1".into(),
            payload_bytes: 12,
        };
        let json = serde_json::to_string(&sent).unwrap();
        assert!(json.contains(r#""event":"signal_send""#));

        let recv = StreamEvent::SignalReceived {
            conversation_id: "c1".into(),
            topic: "signal:teamA/done".into(),
            cursor: "0-1".into(),
            payload_bytes: 12,
        };
        assert_eq!(recv.event_name(), "signal_recv");
    }

    #[test]
    fn deserialization_tolerates_unknown_fields() {
        let json = r#"{"event":"token","conversation_id":"c1","text":"x","index":3,"shard":"future"}"#;
        let ev: StreamEvent = serde_json::from_str(json).unwrap();
        match ev {
            StreamEvent::Token { index, .. } => assert_eq!(index, 3),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn tool_step_roundtrip_with_and_without_summary() {
        let invocation = StreamEvent::ToolStep {
            conversation_id: "c1".into(),
            name: "terminal".into(),
            args: serde_json::from_value(serde_json::json!({"cmd": "ls"})).unwrap(),
            result_summary: None,
        };
        let json = serde_json::to_string(&invocation).unwrap();
        assert!(!json.contains("result_summary"));

        let completion = StreamEvent::ToolStep {
            conversation_id: "c1".into(),
            name: "terminal".into(),
            args: serde_json::Map::new(),
            result_summary: Some("2 files".into()),
        };
        let back: StreamEvent = serde_json::from_str(&serde_json::to_string(&completion).unwrap()).unwrap();
        match back {
            StreamEvent::ToolStep { result_summary, .. } => {
                assert_eq!(result_summary.as_deref(), Some("2 files"));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }
}
