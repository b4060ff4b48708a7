//! `ccnd`: the CCN-role daemon (spec. §4.5 "Role = CCN"). Listens for
//! incoming PEN connections and serves the control surface over a local
//! Unix socket; `clctl` drives it from the outside.

use std::sync::Arc;

use clap::Parser;
use clondike_director::NullDirector;
use clondike_node::{CcnControlSurface, CcnNodeManager, ControlSurface};
use clondiked::{ctlsock, init_tracing, load_config};

#[derive(Parser)]
#[command(version, about = "clondike core node daemon")]
struct Cli {
    /// Path to a `key = value` config file; defaults are used when absent.
    #[arg(long)]
    config: Option<String>,

    /// Control socket path clctl connects to.
    #[arg(long, default_value = "/run/clondike/ccn.sock")]
    control_socket: String,

    /// `arch:addr` endpoint to listen for PEN connections on, e.g.
    /// `x86_64:0.0.0.0:7874`. May be passed more than once.
    #[arg(long = "listen")]
    listen: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    tracing::info!(arch = %config.local_arch, "starting ccnd");
    let node = CcnNodeManager::new(config, Arc::new(NullDirector));

    for endpoint in &cli.listen {
        node.listen(endpoint).await?;
    }

    let surface: Arc<dyn ControlSurface> = Arc::new(CcnControlSurface::new(node));
    ctlsock::serve(&cli.control_socket, surface).await
}
