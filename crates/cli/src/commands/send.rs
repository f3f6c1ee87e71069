//! `hivebus send` — publish one envelope through the gateway.

use clap::Args;

use super::client::{self, EXIT_OK, EXIT_SEND_FAILED};

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Target agent name (becomes recipient `agent:<name>`)
    #[arg(short, long, default_value = "assistant")]
    pub agent: String,

    /// Conversation id (generated when omitted)
    #[arg(long)]
    pub conv: Option<String>,

    /// Sender address
    #[arg(long, default_value = "user:cli")]
    pub sender: String,

    /// Message content
    #[arg(short, long)]
    pub message: String,

    /// Gateway base URL
    #[arg(long, default_value = "http://127.0.0.1:8787")]
    pub base_url: String,
}

pub async fn run(args: SendArgs) -> u8 {
    let conversation_id = args.conv.unwrap_or_else(client::fresh_conversation_id);

    let envelope = serde_json::json!({
        "conversation_id": conversation_id,
        "sender": args.sender,
        "recipient": format!("agent:{}", args.agent),
        "type": "message",
        "content": args.message,
    });

    match client::post_send(&args.base_url, envelope).await {
        Ok(body) => {
            println!("{body}");
            EXIT_OK
        }
        Err(e) => {
            eprintln!("error: {e}");
            EXIT_SEND_FAILED
        }
    }
}
