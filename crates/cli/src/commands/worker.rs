//! `hivebus worker` — run a worker bound to one agent name.
//!
//! Uses the demo echo runner; a real deployment swaps the runner at this
//! seam.

use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use tokio::sync::watch;
use tracing::{error, info, warn};

use hivebus_bus::GroupIdentity;
use hivebus_signals::{SignalHub, SignalPolicy};
use hivebus_worker::{EchoRunner, Worker};

use super::client::EXIT_OK;

#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// Agent name to bind (overrides AGENT_NAME)
    #[arg(short, long)]
    pub agent: Option<String>,

    /// Bus endpoint (overrides BUS_URL)
    #[arg(long)]
    pub bus_url: Option<String>,
}

pub async fn run(args: WorkerArgs) -> u8 {
    let mut config = hivebus_config::RuntimeConfig::from_env();
    if let Some(agent) = args.agent {
        config.agent_name = agent;
    }
    if let Some(bus_url) = args.bus_url {
        config.bus_url = Some(bus_url);
    }
    if config.bus_url.is_none() {
        warn!("no BUS_URL set: this worker only sees its own process; use `hivebus dev` for single-process mode");
    }

    let group = GroupIdentity::for_agent(&config.agent_name);
    let bus = match hivebus_bus::from_url(config.bus_url.as_deref(), Some(group)).await {
        Ok(bus) => bus,
        Err(e) => {
            error!(error = %e, "bus connection failed");
            return 1;
        }
    };

    let policy = SignalPolicy::default()
        .with_topic_prefix(config.signal_topic_prefix.clone().unwrap_or_default())
        .with_payload_max_bytes(config.signal_payload_max_bytes);
    let signals = Arc::new(SignalHub::new(bus.clone()).with_policy(policy));

    let mut worker = Worker::new(&config.agent_name, bus, Arc::new(EchoRunner))
        .with_block_ms(config.worker_block_ms)
        .with_run_timeout(Duration::from_secs(config.run_timeout_secs));
    if config.orchestrate_auto_done {
        worker = worker.with_auto_done(signals);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested, draining current envelope");
            let _ = shutdown_tx.send(true);
        }
    });

    worker.run(shutdown_rx).await;
    EXIT_OK
}
