//! Topic naming — the uniform namespace shared by every bus backend.
//!
//! - `chat:<conversation_id>`  — inbound for a conversation
//! - `chat:<agent_name>`       — inbound addressed to an agent
//! - `stream:<conversation_id>` — egress fan-out of run events
//! - `signal:<scope>/<event>`  — coordination
//! - `control:<agent_name>`    — reserved for lifecycle

use crate::envelope::Recipient;

/// Prefix for signal topics; used by the signal policy layer.
pub const SIGNAL_PREFIX: &str = "signal:";

/// Inbound topic for a conversation.
pub fn chat_for_conversation(conversation_id: &str) -> String {
    format!("chat:{conversation_id}")
}

/// Inbound topic an agent's workers consume.
pub fn chat_for_agent(agent_name: &str) -> String {
    format!("chat:{agent_name}")
}

/// Egress topic carrying a conversation's stream events.
pub fn stream_for(conversation_id: &str) -> String {
    format!("stream:{conversation_id}")
}

/// Coordination topic. `scope_event` is the `<scope>/<event>` part.
pub fn signal(scope_event: &str) -> String {
    format!("signal:{scope_event}")
}

/// Reserved lifecycle topic for an agent.
pub fn control_for(agent_name: &str) -> String {
    format!("control:{agent_name}")
}

/// The topics an inbound envelope is published to.
///
/// The conversation topic is always included so passive observers can tail
/// the conversation; when the recipient addresses an agent, the agent's
/// inbound topic is appended so exactly one group member picks the work up.
pub fn publish_topics(recipient: &str, conversation_id: &str) -> Vec<String> {
    let mut topics = vec![chat_for_conversation(conversation_id)];
    if let Some(Recipient::Agent(name)) = Recipient::parse(recipient) {
        topics.push(chat_for_agent(&name));
    }
    topics
}
