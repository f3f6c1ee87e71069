//! # hivebus Orchestrate
//!
//! Deterministic fan-out of one task across N child conversations of the
//! same agent, with signal-based fan-in.
//!
//! The helper is stateless: it publishes envelopes along the same fan-out
//! path as the gateway and, when asked, blocks on the children's done
//! topics. Parent→child relationships live only in envelope metadata —
//! `conversation_id` stays the sole routing key.

use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use hivebus_bus::{publish_envelope, Bus};
use hivebus_core::envelope::Envelope;
use hivebus_core::error::Result;
use hivebus_signals::{SignalHub, SignalWaitAllResult};

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Parameters for one fan-out.
#[derive(Debug, Clone)]
pub struct OrchestrateRequest {
    /// The parent task each child receives a share of.
    pub task: String,
    /// Number of children to spawn.
    pub children: usize,
    /// Optional per-child responsibility descriptions; child `i` gets the
    /// `i`-th entry when present.
    pub responsibilities: Vec<String>,
    /// Path restrictions forwarded verbatim in orchestration metadata.
    pub allowed_paths: Vec<String>,
    /// Agent the children are addressed to.
    pub target_agent: String,
    /// Sender recorded on the child envelopes.
    pub sender: String,
    /// Barrier deadline when `wait` is set.
    pub timeout_ms: u64,
    /// Whether to block on all done topics before returning.
    pub wait: bool,
}

impl OrchestrateRequest {
    pub fn new(
        task: impl Into<String>,
        children: usize,
        target_agent: impl Into<String>,
    ) -> Self {
        Self {
            task: task.into(),
            children,
            responsibilities: Vec::new(),
            allowed_paths: Vec::new(),
            target_agent: target_agent.into(),
            sender: "agent:orchestrator".into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            wait: false,
        }
    }

    pub fn with_responsibilities(mut self, responsibilities: Vec<String>) -> Self {
        self.responsibilities = responsibilities;
        self
    }

    pub fn with_allowed_paths(mut self, allowed_paths: Vec<String>) -> Self {
        self.allowed_paths = allowed_paths;
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    /// Block on the children's done topics for up to `timeout_ms`.
    pub fn with_wait(mut self, timeout_ms: u64) -> Self {
        self.wait = true;
        self.timeout_ms = timeout_ms;
        self
    }
}

/// One spawned child: its conversation and the topic it signals on
/// completion.
#[derive(Debug, Clone, Serialize)]
pub struct ChildHandle {
    pub conversation_id: String,
    pub done_topic: String,
}

/// Outcome of a fan-out, including the barrier result when waiting.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestrateResult {
    pub ok: bool,
    pub parent_id: String,
    pub children: Vec<ChildHandle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait: Option<SignalWaitAllResult>,
}

/// Fan a task out to `request.children` fresh conversations of the target
/// agent, and optionally wait for every child's completion signal.
pub async fn orchestrate_split(
    bus: &dyn Bus,
    signals: &SignalHub,
    request: OrchestrateRequest,
) -> Result<OrchestrateResult> {
    let parent_id = short_id();
    let mut children = Vec::with_capacity(request.children);

    for i in 0..request.children {
        let conversation_id = format!("conv-child-{}", short_id());
        let done_topic = format!("signal:orchestrate/{parent_id}/{i}/done");

        let mut content = format!(
            "Subtask {}/{} for: {}",
            i + 1,
            request.children.max(1),
            request.task
        );
        if let Some(responsibility) = request.responsibilities.get(i) {
            content.push_str(&format!("\nResponsibility: {responsibility}"));
        }

        let envelope = Envelope::message(
            &conversation_id,
            &request.sender,
            format!("agent:{}", request.target_agent),
            content,
        )
        .with_metadata(
            "orchestrate",
            serde_json::json!({
                "parent_id": parent_id,
                "done_topic": done_topic,
                "responsibilities": request.responsibilities,
                "allowed_paths": request.allowed_paths,
            }),
        );

        let topics = publish_envelope(bus, &envelope).await?;
        debug!(
            conversation_id = %conversation_id,
            done_topic = %done_topic,
            topics = ?topics,
            "child dispatched"
        );

        children.push(ChildHandle {
            conversation_id,
            done_topic,
        });
    }

    info!(
        parent_id = %parent_id,
        children = children.len(),
        target = %request.target_agent,
        wait = request.wait,
        "fan-out published"
    );

    let mut result = OrchestrateResult {
        ok: true,
        parent_id,
        children,
        wait: None,
    };

    if request.wait && !result.children.is_empty() {
        let done_topics: Vec<String> = result
            .children
            .iter()
            .map(|c| c.done_topic.clone())
            .collect();
        let barrier = signals
            .wait_all(
                &done_topics,
                &std::collections::HashMap::new(),
                request.timeout_ms,
                None,
            )
            .await?;
        result.ok = barrier.ok;
        result.wait = Some(barrier);
    }

    Ok(result)
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}
