//! `hivebus chat` — one-shot conversation turn: send a message, stream
//! the reply, exit on the run's final output.

use std::time::Duration;

use clap::Args;

use super::client::{
    self, StreamOptions, StreamOutcome, EXIT_OK, EXIT_SEND_FAILED, EXIT_STREAM_CONNECT_FAILED,
    EXIT_TIMEOUT,
};

#[derive(Args, Debug)]
pub struct ChatArgs {
    /// Target agent name
    #[arg(short, long, default_value = "assistant")]
    pub agent: String,

    /// Message content
    #[arg(short, long)]
    pub message: String,

    /// Conversation id (generated when omitted)
    #[arg(long)]
    pub conv: Option<String>,

    /// Sender address
    #[arg(long, default_value = "user:cli")]
    pub sender: String,

    /// Gateway base URL
    #[arg(long, default_value = "http://127.0.0.1:8787")]
    pub base_url: String,

    /// Give up after this many seconds
    #[arg(long, default_value_t = 120)]
    pub timeout: u64,

    /// Print only the final output text
    #[arg(short, long)]
    pub quiet: bool,

    /// Print one compact JSON object per event
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: ChatArgs) -> u8 {
    let conversation_id = args.conv.unwrap_or_else(client::fresh_conversation_id);

    let options = StreamOptions {
        base_url: args.base_url.clone(),
        conversation_id: conversation_id.clone(),
        since: None,
        max_events: None,
        timeout: Some(Duration::from_secs(args.timeout)),
        stop_at_output: true,
        quiet: args.quiet,
        json: args.json,
    };

    // Subscribe before sending so the run's first events are never missed.
    let subscription = match client::connect_stream(&options, None, None).await {
        Ok(response) => response,
        Err(e) => {
            eprintln!("error: {e}");
            return EXIT_STREAM_CONNECT_FAILED;
        }
    };

    let envelope = serde_json::json!({
        "conversation_id": conversation_id,
        "sender": args.sender,
        "recipient": format!("agent:{}", args.agent),
        "type": "message",
        "content": args.message,
    });
    if let Err(e) = client::post_send(&args.base_url, envelope).await {
        eprintln!("error: {e}");
        return EXIT_SEND_FAILED;
    }

    match client::follow_stream(options, Some(subscription)).await {
        StreamOutcome::Completed(_) => EXIT_OK,
        StreamOutcome::TimedOut => {
            eprintln!("error: no final output within {}s", args.timeout);
            EXIT_TIMEOUT
        }
        StreamOutcome::ConnectFailed(e) => {
            eprintln!("error: {e}");
            EXIT_STREAM_CONNECT_FAILED
        }
    }
}
