//! hivebus CLI — the main entry point.
//!
//! Commands:
//! - `send`    — Publish one envelope through the gateway
//! - `stream`  — Follow a conversation's event stream over SSE
//! - `chat`    — Send a message and stream the reply until the final output
//! - `gateway` — Start the HTTP gateway server
//! - `worker`  — Start a worker for one agent name
//! - `dev`     — Gateway + echo worker in one process on the in-memory bus
//!
//! Exit codes: 0 ok, 2 timeout, 3 send failed, 4 stream connect failed,
//! 5 usage error.

use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod commands;

use commands::client::EXIT_USAGE;

#[derive(Parser, Debug)]
#[command(
    name = "hivebus",
    about = "hivebus — multi-agent message-passing runtime",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Publish one envelope through the gateway
    Send(commands::send::SendArgs),

    /// Follow a conversation's event stream
    Stream(commands::stream::StreamArgs),

    /// Send a message and stream the reply until the final output
    Chat(commands::chat::ChatArgs),

    /// Start the HTTP gateway server
    Gateway(commands::gateway::GatewayArgs),

    /// Start a worker bound to one agent name
    Worker(commands::worker::WorkerArgs),

    /// Run gateway and worker in one process on the in-memory bus
    Dev(commands::dev::DevArgs),
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help/--version exit cleanly; real usage errors use code 5.
            let is_usage_error = e.use_stderr();
            let _ = e.print();
            return if is_usage_error {
                ExitCode::from(EXIT_USAGE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    ExitCode::from(run(cli))
}

#[tokio::main]
async fn run(cli: Cli) -> u8 {
    match cli.command {
        Commands::Send(args) => commands::send::run(args).await,
        Commands::Stream(args) => commands::stream::run(args).await,
        Commands::Chat(args) => commands::chat::run(args).await,
        Commands::Gateway(args) => commands::gateway::run(args).await,
        Commands::Worker(args) => commands::worker::run(args).await,
        Commands::Dev(args) => commands::dev::run(args).await,
    }
}
