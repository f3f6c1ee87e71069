//! # hivebus Worker
//!
//! Drains the inbound topic for one named agent, invokes the Runner per
//! envelope, mirrors the Runner's event stream onto the conversation's
//! egress topic, and acknowledges the inbound entry.
//!
//! The worker reads in consumer-group mode: one stable group per agent
//! name, one unique consumer per process. Parallelism comes from running
//! more worker processes against the same group, not from concurrency
//! inside one loop — a single consumer processes envelopes one at a time.

pub mod runner;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use hivebus_bus::{publish_event, Bus, BusEntry};
use hivebus_core::envelope::{Envelope, EnvelopeKind};
use hivebus_core::error::BusError;
use hivebus_core::event::StreamEvent;
use hivebus_core::topic;
use hivebus_signals::SignalHub;

pub use runner::{EchoRunner, Runner};

const READ_BATCH: usize = 16;
const PUBLISH_ATTEMPTS: u32 = 3;
const BACKOFF_START: Duration = Duration::from_millis(50);
const BACKOFF_CAP: Duration = Duration::from_millis(200);
const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(300);
const DIGEST_MAX_CHARS: usize = 80;

/// Counters exposed by a running worker.
#[derive(Debug, Default)]
pub struct WorkerMetrics {
    processed: AtomicU64,
    errors: AtomicU64,
}

impl WorkerMetrics {
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

/// The subscribe→run→publish pipeline for one agent name.
///
/// The bus handle must be constructed in consumer-group mode (see
/// [`hivebus_bus::GroupIdentity::for_agent`]); tail-mode handles would
/// fan every envelope out to every worker.
pub struct Worker {
    agent_name: String,
    bus: Arc<dyn Bus>,
    runner: Arc<dyn Runner>,
    block_ms: u64,
    run_timeout: Duration,
    auto_done: Option<Arc<SignalHub>>,
    metrics: Arc<WorkerMetrics>,
}

impl Worker {
    pub fn new(
        agent_name: impl Into<String>,
        bus: Arc<dyn Bus>,
        runner: Arc<dyn Runner>,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            bus,
            runner,
            block_ms: 1_000,
            run_timeout: DEFAULT_RUN_TIMEOUT,
            auto_done: None,
            metrics: Arc::new(WorkerMetrics::default()),
        }
    }

    /// Blocking-read wait used when the inbound topic is idle.
    pub fn with_block_ms(mut self, block_ms: u64) -> Self {
        self.block_ms = block_ms;
        self
    }

    /// Wall-clock limit for a single run; a runner that produces no
    /// terminal event within it gets a synthetic output.
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    /// Enable the orchestration child-completion signal: after a run's
    /// terminal event, envelopes carrying `metadata.orchestrate.done_topic`
    /// trigger a signal send with the output digest.
    pub fn with_auto_done(mut self, signals: Arc<SignalHub>) -> Self {
        self.auto_done = Some(signals);
        self
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn metrics(&self) -> Arc<WorkerMetrics> {
        self.metrics.clone()
    }

    /// Run the subscribe loop until `shutdown` flips to true. The envelope
    /// being processed when shutdown arrives is drained and acknowledged;
    /// entries read but not yet processed are left unacked for the group's
    /// claim timeout to redeliver.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        let inbound = topic::chat_for_agent(&self.agent_name);
        info!(agent = %self.agent_name, topic = %inbound, "worker started");

        let mut idle_backoff = BACKOFF_START;
        while !*shutdown.borrow() {
            match self.bus.read(&inbound, None, READ_BATCH, self.block_ms).await {
                Ok(batch) if batch.is_empty() => {
                    // Group mode already slept in `read`; only pace
                    // explicitly when blocking reads are disabled.
                    if self.block_ms == 0 {
                        tokio::time::sleep(idle_backoff).await;
                        idle_backoff = (idle_backoff * 2).min(BACKOFF_CAP);
                    }
                }
                Ok(batch) => {
                    idle_backoff = BACKOFF_START;
                    for entry in batch {
                        self.process_entry(&inbound, entry).await;
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, topic = %inbound, "inbound read failed");
                    tokio::time::sleep(idle_backoff).await;
                    idle_backoff = (idle_backoff * 2).min(BACKOFF_CAP);
                }
            }
        }

        info!(agent = %self.agent_name, "worker stopped");
    }

    /// Drain whatever is currently available without blocking and return
    /// the number of entries handled. Useful for tests and one-shot tools.
    pub async fn process_available(&self, limit: usize) -> Result<usize, BusError> {
        let inbound = topic::chat_for_agent(&self.agent_name);
        let batch = self.bus.read(&inbound, None, limit, 0).await?;
        let count = batch.len();
        for entry in batch {
            self.process_entry(&inbound, entry).await;
        }
        Ok(count)
    }

    async fn process_entry(&self, inbound_topic: &str, entry: BusEntry) {
        let envelope: Envelope = match serde_json::from_value(entry.message.payload.clone()) {
            Ok(env) => env,
            Err(e) => {
                // Protocol error: never crash the subscriber, never redeliver
                // an entry that will never parse.
                warn!(cursor = %entry.cursor, error = %e, "malformed inbound entry, skipping");
                self.ack_entry(inbound_topic, &entry.cursor).await;
                return;
            }
        };

        if envelope.kind == EnvelopeKind::Control {
            // Lifecycle handling is reserved; without a runner opt-in,
            // control envelopes are consumed without starting a run.
            debug!(id = %envelope.id, "control envelope acknowledged without run");
            self.ack_entry(inbound_topic, &entry.cursor).await;
            return;
        }

        debug!(
            id = %envelope.id,
            conversation_id = %envelope.conversation_id,
            "processing envelope"
        );

        let output_text = self.run_envelope(&envelope).await;
        self.metrics.processed.fetch_add(1, Ordering::Relaxed);
        self.maybe_signal_done(&envelope, &output_text).await;
        self.ack_entry(inbound_topic, &entry.cursor).await;
    }

    /// Execute one run and mirror its events. Always resolves to the final
    /// output text — real when the runner behaved, synthetic otherwise —
    /// so every inbound envelope produces a terminal event.
    async fn run_envelope(&self, envelope: &Envelope) -> String {
        let conversation_id = envelope.conversation_id.clone();
        let deadline = Instant::now() + self.run_timeout;

        let mut rx = match self.runner.stream_run(envelope.clone()).await {
            Ok(rx) => rx,
            Err(e) => {
                self.metrics.errors.fetch_add(1, Ordering::Relaxed);
                let text = format!("agent run failed: {e}");
                self.publish_error_output(&conversation_id, &text).await;
                return text;
            }
        };

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match tokio::time::timeout(deadline - now, rx.recv()).await {
                Ok(Some(event)) => {
                    let terminal_text = match &event {
                        StreamEvent::Output { text, .. } => Some(text.clone()),
                        _ => None,
                    };
                    if let Err(e) = self.publish_with_retry(&event).await {
                        warn!(error = %e, conversation_id = %conversation_id, "egress publish exhausted retries");
                        let text = format!("event stream interrupted: {e}");
                        self.publish_error_output(&conversation_id, &text).await;
                        return terminal_text.unwrap_or(text);
                    }
                    if let Some(text) = terminal_text {
                        return text;
                    }
                }
                Ok(None) => break, // runner closed without a terminal event
                Err(_) => break,   // wall-clock timeout
            }
        }

        // Protocol violation: no terminal event. Synthesize one so the
        // conversation always resolves and the entry can be acked.
        self.metrics.errors.fetch_add(1, Ordering::Relaxed);
        let text = format!(
            "agent run produced no final output within {}s",
            self.run_timeout.as_secs()
        );
        self.publish_error_output(&conversation_id, &text).await;
        text
    }

    /// Publish a diagnostic log followed by a synthetic terminal output.
    /// Best-effort: if the bus is down there is nothing further to surface.
    async fn publish_error_output(&self, conversation_id: &str, text: &str) {
        let log = StreamEvent::log(conversation_id, "error", "worker", text);
        if let Err(e) = self.publish_with_retry(&log).await {
            warn!(error = %e, "failed to publish error log event");
        }
        let output = StreamEvent::output(conversation_id, text);
        if let Err(e) = self.publish_with_retry(&output).await {
            warn!(error = %e, "failed to publish synthetic output event");
        }
    }

    async fn publish_with_retry(&self, event: &StreamEvent) -> Result<(), BusError> {
        let mut delay = BACKOFF_START;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match publish_event(self.bus.as_ref(), event).await {
                Ok(_) => return Ok(()),
                Err(e) if attempt < PUBLISH_ATTEMPTS => {
                    warn!(error = %e, attempt, "egress publish failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(BACKOFF_CAP);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn maybe_signal_done(&self, envelope: &Envelope, output_text: &str) {
        let Some(signals) = &self.auto_done else {
            return;
        };
        let Some(done_topic) = envelope
            .metadata
            .get("orchestrate")
            .and_then(|o| o.get("done_topic"))
            .and_then(|v| v.as_str())
        else {
            return;
        };

        let payload = serde_json::json!({ "output_digest": output_digest(output_text) });
        match signals
            .send(done_topic, payload, Some(&envelope.conversation_id))
            .await
        {
            Ok(sent) => debug!(topic = %done_topic, cursor = %sent.cursor, "completion signal sent"),
            Err(e) => warn!(topic = %done_topic, error = %e, "completion signal failed"),
        }
    }

    async fn ack_entry(&self, topic: &str, cursor: &str) {
        if let Err(e) = self.bus.ack(topic, cursor).await {
            warn!(cursor = %cursor, error = %e, "ack failed; entry may be redelivered");
        }
    }
}

/// Compact summary of a run's output for completion signals.
fn output_digest(text: &str) -> String {
    let chars = text.chars().count();
    if chars <= DIGEST_MAX_CHARS {
        return text.to_string();
    }
    let prefix: String = text.chars().take(DIGEST_MAX_CHARS).collect();
    format!("{prefix}… ({chars} chars)")
}
