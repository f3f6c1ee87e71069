//! `hivebus dev` — single-process mode: gateway plus an echo worker over
//! the in-memory bus. Handy for demos and local client development
//! without a Redis instance.

use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use tokio::sync::watch;
use tracing::{error, info};

use hivebus_bus::{Bus, GroupIdentity, MemoryBus};
use hivebus_signals::{SignalHub, SignalPolicy};
use hivebus_worker::{EchoRunner, Worker};

use super::client::EXIT_OK;

#[derive(Args, Debug)]
pub struct DevArgs {
    /// Bind address (overrides GATEWAY_ADDR)
    #[arg(long)]
    pub addr: Option<String>,

    /// Agent name to serve (overrides AGENT_NAME)
    #[arg(short, long)]
    pub agent: Option<String>,
}

pub async fn run(args: DevArgs) -> u8 {
    let mut config = hivebus_config::RuntimeConfig::from_env();
    if let Some(addr) = args.addr {
        config.gateway_addr = addr;
    }
    if let Some(agent) = args.agent {
        config.agent_name = agent;
    }

    // One shared in-memory store: a group-mode handle for the worker, a
    // tail-mode handle for the gateway.
    let store = MemoryBus::new();
    let worker_bus: Arc<dyn Bus> = Arc::new(
        store
            .clone()
            .with_group(GroupIdentity::for_agent(&config.agent_name)),
    );

    let policy = SignalPolicy::default()
        .with_topic_prefix(config.signal_topic_prefix.clone().unwrap_or_default())
        .with_payload_max_bytes(config.signal_payload_max_bytes);
    let signals = Arc::new(SignalHub::new(worker_bus.clone()).with_policy(policy));

    let mut worker = Worker::new(&config.agent_name, worker_bus, Arc::new(EchoRunner))
        .with_block_ms(config.worker_block_ms)
        .with_run_timeout(Duration::from_secs(config.run_timeout_secs));
    if config.orchestrate_auto_done {
        worker = worker.with_auto_done(signals);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    info!(
        agent = %config.agent_name,
        addr = %config.gateway_addr,
        "dev mode: gateway + echo worker on the in-memory bus"
    );

    let gateway_bus: Arc<dyn Bus> = Arc::new(store);
    let result =
        hivebus_gateway::start(&config.gateway_addr, gateway_bus, config.gateway_max_events).await;

    let _ = shutdown_tx.send(true);
    let _ = worker_handle.await;

    match result {
        Ok(()) => EXIT_OK,
        Err(e) => {
            error!(error = %e, "gateway exited");
            1
        }
    }
}
