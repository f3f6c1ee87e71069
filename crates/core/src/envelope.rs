//! The message envelope — the unit published to inbound topics.
//!
//! Envelopes are created at ingress, validated once, and never mutated.
//! Delivery transport (Redis, in-process, HTTP) is intentionally not
//! encoded here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Discriminator for the two envelope families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    /// A user or agent chat message to be processed by a run.
    Message,
    /// A lifecycle/control record; workers ignore these unless a runner
    /// opts in to handling them.
    Control,
}

/// Immutable wire record for a message addressed to a conversation or agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Process-generated unique identifier, stable for the envelope's life.
    /// Clients may supply their own; ingress generates one when absent.
    #[serde(default)]
    pub id: String,

    /// Routing key for the egress topic and per-conversation state.
    pub conversation_id: String,

    /// `user:<id>` or `agent:<name>`.
    pub sender: String,

    /// `chat:<conversation_id>` or `agent:<name>`.
    pub recipient: String,

    /// `message` | `control`.
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,

    /// Optional text body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Orchestration hints and other opaque extensions.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// UTC creation time, RFC3339 on the wire.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Envelope {
    /// Create a new `message` envelope with a fresh id.
    pub fn message(
        conversation_id: impl Into<String>,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            sender: sender.into(),
            recipient: recipient.into(),
            kind: EnvelopeKind::Message,
            content: Some(content.into()),
            metadata: serde_json::Map::new(),
            created_at: Utc::now(),
        }
    }

    /// Create a new `control` envelope with a fresh id.
    pub fn control(
        conversation_id: impl Into<String>,
        sender: impl Into<String>,
        recipient: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            sender: sender.into(),
            recipient: recipient.into(),
            kind: EnvelopeKind::Control,
            content: None,
            metadata: serde_json::Map::new(),
            created_at: Utc::now(),
        }
    }

    /// Attach metadata, builder-style.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Check the address schemes and required fields.
    ///
    /// Validation never touches the bus; a failing envelope generates no
    /// traffic anywhere.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.conversation_id.trim().is_empty() {
            return Err(ValidationError::MissingField("conversation_id"));
        }
        if Sender::parse(&self.sender).is_none() {
            return Err(ValidationError::BadSender(self.sender.clone()));
        }
        if Recipient::parse(&self.recipient).is_none() {
            return Err(ValidationError::BadRecipient(self.recipient.clone()));
        }
        // `message` envelopes carry the run input; `control` may be bodyless.
        if self.kind == EnvelopeKind::Message
            && self.content.as_deref().map_or(true, |c| c.trim().is_empty())
        {
            return Err(ValidationError::EmptyContent);
        }
        Ok(())
    }
}

/// Parsed form of an envelope `sender` address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sender {
    /// `user:<id>`
    User(String),
    /// `agent:<name>`
    Agent(String),
}

impl Sender {
    pub fn parse(s: &str) -> Option<Self> {
        let (scheme, rest) = s.split_once(':')?;
        if rest.is_empty() {
            return None;
        }
        match scheme {
            "user" => Some(Self::User(rest.to_string())),
            "agent" => Some(Self::Agent(rest.to_string())),
            _ => None,
        }
    }
}

/// Parsed form of an envelope `recipient` address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    /// `agent:<name>` — routed to the agent's inbound topic (and mirrored
    /// onto the conversation topic).
    Agent(String),
    /// `chat:<conversation_id>` — routed to the conversation topic only.
    Chat(String),
}

impl Recipient {
    pub fn parse(s: &str) -> Option<Self> {
        let (scheme, rest) = s.split_once(':')?;
        if rest.is_empty() {
            return None;
        }
        match scheme {
            "agent" => Some(Self::Agent(rest.to_string())),
            "chat" => Some(Self::Chat(rest.to_string())),
            _ => None,
        }
    }
}
