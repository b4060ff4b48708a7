//! `pend`: the PEN-role daemon (spec. §4.5 "Role = PEN"). Connects out to
//! one or more CCNs and serves the control surface over a local Unix
//! socket; `clctl` drives it from the outside.

use std::sync::Arc;

use clap::Parser;
use clondike_director::NullDirector;
use clondike_node::{ControlSurface, PenControlSurface, PenNodeManager};
use clondiked::{ctlsock, init_tracing, load_config};

#[derive(Parser)]
#[command(version, about = "clondike execution node daemon")]
struct Cli {
    /// Path to a `key = value` config file; defaults are used when absent.
    #[arg(long)]
    config: Option<String>,

    /// Control socket path clctl connects to.
    #[arg(long, default_value = "/run/clondike/pen.sock")]
    control_socket: String,

    /// `arch:addr[@auth_data]` endpoint to connect to at startup, e.g.
    /// `x86_64:10.0.0.1:7874`. May be passed more than once.
    #[arg(long = "connect")]
    connect: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    tracing::info!(arch = %config.local_arch, "starting pend");
    let node = PenNodeManager::new(config, Arc::new(NullDirector));

    for endpoint in &cli.connect {
        let (endpoint, auth) = match endpoint.split_once('@') {
            Some((endpoint, auth)) => (endpoint, auth.as_bytes().to_vec()),
            None => (endpoint.as_str(), Vec::new()),
        };
        let slot = node.connect(endpoint, auth).await?;
        tracing::info!(endpoint, slot, "connected to ccn");
    }

    let surface: Arc<dyn ControlSurface> = Arc::new(PenControlSurface::new(node));
    ctlsock::serve(&cli.control_socket, surface).await
}
