//! Shared HTTP/SSE client plumbing for the `send`, `stream`, and `chat`
//! commands.

use std::io::Write;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tracing::debug;

pub const EXIT_OK: u8 = 0;
pub const EXIT_TIMEOUT: u8 = 2;
pub const EXIT_SEND_FAILED: u8 = 3;
pub const EXIT_STREAM_CONNECT_FAILED: u8 = 4;
pub const EXIT_USAGE: u8 = 5;

/// Pause before re-dialing a dropped stream connection.
const RECONNECT_DELAY: Duration = Duration::from_millis(500);

// ── POST /send ────────────────────────────────────────────────────────────

/// Send one envelope; returns the gateway's response body on success.
pub async fn post_send(
    base_url: &str,
    envelope: serde_json::Value,
) -> Result<serde_json::Value, String> {
    let url = format!("{}/send", base_url.trim_end_matches('/'));
    let client = reqwest::Client::new();

    let response = client
        .post(&url)
        .json(&envelope)
        .send()
        .await
        .map_err(|e| format!("send request failed: {e}"))?;

    let status = response.status();
    let body: serde_json::Value = response
        .json()
        .await
        .map_err(|e| format!("send response unreadable: {e}"))?;

    if !status.is_success() {
        return Err(format!("gateway returned {status}: {body}"));
    }
    Ok(body)
}

// ── SSE framing ───────────────────────────────────────────────────────────

/// One parsed SSE frame. Comment lines (keepalives) never produce frames.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub id: Option<String>,
    pub data: Option<String>,
}

/// Pull every complete frame out of the accumulation buffer, leaving any
/// partial frame in place for the next chunk.
pub fn drain_frames(buffer: &mut String) -> Vec<SseFrame> {
    let mut frames = Vec::new();
    while let Some(pos) = buffer.find("\n\n") {
        let raw: String = buffer.drain(..pos + 2).collect();
        let mut frame = SseFrame::default();
        for line in raw.lines() {
            if let Some(rest) = line.strip_prefix("id:") {
                frame.id = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("data:") {
                let rest = rest.strip_prefix(' ').unwrap_or(rest);
                match &mut frame.data {
                    Some(data) => {
                        data.push('\n');
                        data.push_str(rest);
                    }
                    None => frame.data = Some(rest.to_string()),
                }
            }
            // ":" comment lines and unknown fields are ignored
        }
        if frame.id.is_some() || frame.data.is_some() {
            frames.push(frame);
        }
    }
    frames
}

// ── Event rendering ───────────────────────────────────────────────────────

/// Renders stream events for the terminal in normal, `--quiet`, or
/// `--json` mode.
pub struct EventPrinter {
    quiet: bool,
    json: bool,
    streamed_tokens: bool,
}

impl EventPrinter {
    pub fn new(quiet: bool, json: bool) -> Self {
        Self {
            quiet,
            json,
            streamed_tokens: false,
        }
    }

    /// Render one event. Returns the final text when the event terminates
    /// a run.
    pub fn handle(&mut self, data: &str) -> Option<String> {
        let value: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "skipping malformed event payload");
                return None;
            }
        };

        let event = value["event"].as_str().unwrap_or("").to_string();
        let output = (event == "output")
            .then(|| value["text"].as_str().unwrap_or("").to_string());

        if self.json {
            println!("{value}");
            return output;
        }

        match event.as_str() {
            "token" => {
                if !self.quiet {
                    print!("{}", value["text"].as_str().unwrap_or(""));
                    let _ = std::io::stdout().flush();
                    self.streamed_tokens = true;
                }
            }
            "output" => {
                let text = value["text"].as_str().unwrap_or("");
                if self.quiet {
                    println!("{text}");
                } else if self.streamed_tokens {
                    // Tokens already painted the reply; just finish the line.
                    println!();
                } else {
                    println!("{text}");
                }
                self.streamed_tokens = false;
            }
            "tool_step" => {
                if !self.quiet {
                    let name = value["name"].as_str().unwrap_or("?");
                    match value["result_summary"].as_str() {
                        Some(summary) => println!("[tool] {name} → {summary}"),
                        None => println!("[tool] {name} …"),
                    }
                }
            }
            "log" => {
                if !self.quiet {
                    eprintln!(
                        "[{}] {}: {}",
                        value["level"].as_str().unwrap_or("info"),
                        value["component"].as_str().unwrap_or("?"),
                        value["message"].as_str().unwrap_or("")
                    );
                }
            }
            "user_message" => {
                if !self.quiet {
                    println!(
                        "[{}] {}",
                        value["sender"].as_str().unwrap_or("user"),
                        value["text"].as_str().unwrap_or("")
                    );
                }
            }
            "signal_send" | "signal_recv" => {
                if !self.quiet {
                    println!(
                        "[{}] {} ({} bytes)",
                        event,
                        value["topic"].as_str().unwrap_or("?"),
                        value["payload_bytes"].as_u64().unwrap_or(0)
                    );
                }
            }
            _ => {} // tolerate future variants
        }

        output
    }
}

// ── Stream following ──────────────────────────────────────────────────────

pub struct StreamOptions {
    pub base_url: String,
    pub conversation_id: String,
    pub since: Option<String>,
    pub max_events: Option<usize>,
    pub timeout: Option<Duration>,
    /// Return as soon as a terminal output event arrives (one-shot mode).
    pub stop_at_output: bool,
    pub quiet: bool,
    pub json: bool,
}

pub enum StreamOutcome {
    /// The stream finished (output seen in one-shot mode, or the event cap
    /// was reached). Carries the final output text when one was observed.
    Completed(Option<String>),
    TimedOut,
    ConnectFailed(String),
}

/// Open the SSE endpoint for a conversation.
pub async fn connect_stream(
    options: &StreamOptions,
    last_id: Option<&str>,
    remaining_events: Option<usize>,
) -> Result<reqwest::Response, String> {
    let mut url = format!(
        "{}/stream/{}",
        options.base_url.trim_end_matches('/'),
        options.conversation_id
    );
    let mut params = Vec::new();
    if let Some(max) = remaining_events {
        params.push(format!("max_events={max}"));
    }
    // Resume via header once we have seen an id; `since` only seeds the
    // first connection.
    if last_id.is_none() {
        if let Some(since) = &options.since {
            params.push(format!("since={since}"));
        }
    }
    if !params.is_empty() {
        url.push('?');
        url.push_str(&params.join("&"));
    }

    let client = reqwest::Client::new();
    let mut request = client.get(&url).header("Accept", "text/event-stream");
    if let Some(id) = last_id {
        request = request.header("Last-Event-ID", id);
    }

    let response = request
        .send()
        .await
        .map_err(|e| format!("stream connect failed: {e}"))?;
    if !response.status().is_success() {
        return Err(format!("stream returned {}", response.status()));
    }
    Ok(response)
}

/// Follow a conversation stream, reconnecting with cursor resume on
/// transport drops, until the stop condition or deadline is reached.
///
/// `preconnected` lets one-shot callers establish the subscription before
/// publishing their message so no early events are missed.
pub async fn follow_stream(
    options: StreamOptions,
    preconnected: Option<reqwest::Response>,
) -> StreamOutcome {
    let deadline = options.timeout.map(|t| Instant::now() + t);
    let mut printer = EventPrinter::new(options.quiet, options.json);
    let mut last_id: Option<String> = None;
    let mut seen = 0usize;
    let mut response = preconnected;

    loop {
        let conn = match response.take() {
            Some(conn) => conn,
            None => {
                let remaining_events = options.max_events.map(|max| max.saturating_sub(seen));
                match connect_stream(&options, last_id.as_deref(), remaining_events).await {
                    Ok(conn) => conn,
                    Err(e) if last_id.is_none() && seen == 0 => {
                        return StreamOutcome::ConnectFailed(e);
                    }
                    Err(e) => {
                        debug!(error = %e, "reconnect failed, retrying");
                        if past(deadline) {
                            return StreamOutcome::TimedOut;
                        }
                        tokio::time::sleep(RECONNECT_DELAY).await;
                        continue;
                    }
                }
            }
        };

        let mut body = conn.bytes_stream();
        let mut buffer = String::new();

        loop {
            let chunk = match remaining(deadline) {
                Some(budget) => match tokio::time::timeout(budget, body.next()).await {
                    Ok(chunk) => chunk,
                    Err(_) => return StreamOutcome::TimedOut,
                },
                None => body.next().await,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for frame in drain_frames(&mut buffer) {
                        if let Some(id) = frame.id {
                            last_id = Some(id);
                        }
                        let Some(data) = frame.data else { continue };
                        seen += 1;
                        let output = printer.handle(&data);
                        if options.stop_at_output {
                            if let Some(text) = output {
                                return StreamOutcome::Completed(Some(text));
                            }
                        }
                        if options.max_events.is_some_and(|max| seen >= max) {
                            return StreamOutcome::Completed(None);
                        }
                    }
                }
                Some(Err(e)) => {
                    debug!(error = %e, "stream transport error, resuming");
                    break; // reconnect with Last-Event-ID
                }
                None => {
                    // Server closed the response. Without a stop condition
                    // the tail is simply over when the server says so.
                    if !options.stop_at_output {
                        return StreamOutcome::Completed(None);
                    }
                    break; // one-shot: reconnect and keep waiting
                }
            }

            if past(deadline) {
                return StreamOutcome::TimedOut;
            }
        }

        if past(deadline) {
            return StreamOutcome::TimedOut;
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|d| d.saturating_duration_since(Instant::now()))
}

fn past(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

/// Short random conversation id for ad-hoc sessions.
pub fn fresh_conversation_id() -> String {
    format!("conv-{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
}
