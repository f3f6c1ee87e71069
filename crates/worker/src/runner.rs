//! The Runner seam — the external collaborator that turns an envelope into
//! a stream of events.
//!
//! A Runner is single-threaded per call and must emit exactly one terminal
//! `Output` event per run; the Worker synthesizes one if it doesn't. Lazy
//! sequences are bridged through an mpsc channel so synchronous and
//! asynchronous implementations adapt the same way.

use async_trait::async_trait;
use tokio::sync::mpsc;

use hivebus_core::envelope::Envelope;
use hivebus_core::error::RunnerError;
use hivebus_core::event::StreamEvent;

/// Capacity of the event bridge between a runner and the worker loop.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Pluggable run interface consumed by the Worker.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Start a run for one envelope and return the event stream.
    ///
    /// The returned channel yields events in emission order and closes when
    /// the run is finished. The last event of a well-behaved run is
    /// `Output`.
    async fn stream_run(
        &self,
        envelope: Envelope,
    ) -> Result<mpsc::Receiver<StreamEvent>, RunnerError>;
}

/// Demo runner for local development and tests: streams the envelope's
/// content back one character at a time, then echoes it as the output.
pub struct EchoRunner;

#[async_trait]
impl Runner for EchoRunner {
    async fn stream_run(
        &self,
        envelope: Envelope,
    ) -> Result<mpsc::Receiver<StreamEvent>, RunnerError> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let conversation_id = envelope.conversation_id.clone();
            let text = envelope.content.unwrap_or_default();

            for (index, ch) in text.chars().enumerate() {
                let token = StreamEvent::token(&conversation_id, ch.to_string(), index as u64);
                if tx.send(token).await.is_err() {
                    return; // worker went away; stop producing
                }
            }
            let _ = tx.send(StreamEvent::output(&conversation_id, text)).await;
        });

        Ok(rx)
    }
}
