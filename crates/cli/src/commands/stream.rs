//! `hivebus stream` — follow a conversation's event stream over SSE.

use std::time::Duration;

use clap::Args;

use super::client::{
    self, StreamOptions, StreamOutcome, EXIT_OK, EXIT_STREAM_CONNECT_FAILED, EXIT_TIMEOUT,
};

#[derive(Args, Debug)]
pub struct StreamArgs {
    /// Conversation id to follow
    #[arg(long)]
    pub conv: String,

    /// Gateway base URL
    #[arg(long, default_value = "http://127.0.0.1:8787")]
    pub base_url: String,

    /// Resume from this cursor instead of the live tail
    #[arg(long)]
    pub since: Option<String>,

    /// Stop after this many events
    #[arg(long)]
    pub max_events: Option<usize>,

    /// Give up after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Print only the final output text
    #[arg(short, long)]
    pub quiet: bool,

    /// Print one compact JSON object per event
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: StreamArgs) -> u8 {
    let options = StreamOptions {
        base_url: args.base_url,
        conversation_id: args.conv,
        since: args.since,
        max_events: args.max_events,
        timeout: args.timeout.map(Duration::from_secs),
        stop_at_output: false,
        quiet: args.quiet,
        json: args.json,
    };

    match client::follow_stream(options, None).await {
        StreamOutcome::Completed(_) => EXIT_OK,
        StreamOutcome::TimedOut => EXIT_TIMEOUT,
        StreamOutcome::ConnectFailed(e) => {
            eprintln!("error: {e}");
            EXIT_STREAM_CONNECT_FAILED
        }
    }
}
