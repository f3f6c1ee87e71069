//! `hivebus gateway` — start the HTTP gateway server.

use clap::Args;
use tracing::error;

use super::client::EXIT_OK;

#[derive(Args, Debug)]
pub struct GatewayArgs {
    /// Bind address (overrides GATEWAY_ADDR)
    #[arg(long)]
    pub addr: Option<String>,

    /// Bus endpoint (overrides BUS_URL; empty selects the in-memory bus)
    #[arg(long)]
    pub bus_url: Option<String>,
}

pub async fn run(args: GatewayArgs) -> u8 {
    let mut config = hivebus_config::RuntimeConfig::from_env();
    if let Some(addr) = args.addr {
        config.gateway_addr = addr;
    }
    if let Some(bus_url) = args.bus_url {
        config.bus_url = Some(bus_url);
    }

    let bus = match hivebus_bus::from_url(config.bus_url.as_deref(), None).await {
        Ok(bus) => bus,
        Err(e) => {
            error!(error = %e, "bus connection failed");
            return 1;
        }
    };

    if let Err(e) =
        hivebus_gateway::start(&config.gateway_addr, bus, config.gateway_max_events).await
    {
        error!(error = %e, "gateway exited");
        return 1;
    }
    EXIT_OK
}
