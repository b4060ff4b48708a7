//! `clctl`: a thin CLI front-end to a running `ccnd`/`pend`'s control
//! surface (spec. §6), talking to its Unix control socket. Subcommand shape
//! and alias style borrowed from `wormhole`'s own `dctl` CLI
//! (`wormhole/src/bin/dctl/main.rs`).

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

#[derive(Parser)]
#[command(version, about = "control client for clondiked")]
struct Cli {
    /// Path to the daemon's control socket.
    #[arg(long, short = 's')]
    socket: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// ccn/listen: add a listening endpoint, `arch:addr`.
    Listen { endpoint: String },

    /// ccn/mig/emigrate-ppm-p: start preemptive emigration of a pid.
    #[clap(alias("emigrate"))]
    EmigratePpm { pid: i32, manager_slot: usize },

    /// ccn/mig/migrate-home: migrate a pid back to its origin node.
    MigrateHome { pid: i32 },

    /// pen/connect: connect out to a CCN, `arch:addr[@auth_data]`.
    Connect { endpoint: String },

    /// pen/nodes/<n>/migrate-home-all: migrate every child on a manager home.
    MigrateHomeAll { manager_slot: usize },

    /// ccn/nodes/<n>/state or pen/nodes/<n>/state, depending on `--role`.
    NodeState {
        #[arg(long, value_parser = ["ccn", "pen"])]
        role: String,
        manager_slot: usize,
    },

    /// Escape hatch: issue a raw control-surface read.
    #[clap(hide = true)]
    Read { path: String },

    /// Escape hatch: issue a raw control-surface write.
    #[clap(hide = true)]
    Write { path: String, value: String },
}

async fn roundtrip(socket: &str, line: String) -> anyhow::Result<String> {
    let stream = UnixStream::connect(socket).await.with_context(|| format!("connecting to {socket}"))?;
    let (reader, mut writer) = stream.into_split();
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;

    let mut reply = String::new();
    BufReader::new(reader).read_line(&mut reply).await?;
    let reply = reply.trim_end();

    match reply.strip_prefix("ERR ") {
        Some(message) => Err(anyhow!("{message}")),
        None => Ok(reply.strip_prefix("OK").unwrap_or(reply).trim_start().to_string()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let line = match &cli.command {
        Commands::Listen { endpoint } => format!("WRITE ccn/listen {endpoint}"),
        Commands::EmigratePpm { pid, manager_slot } => format!("WRITE ccn/mig/emigrate-ppm-p {pid},{manager_slot}"),
        Commands::MigrateHome { pid } => format!("WRITE ccn/mig/migrate-home {pid}"),
        Commands::Connect { endpoint } => format!("WRITE pen/connect {endpoint}"),
        Commands::MigrateHomeAll { manager_slot } => format!("WRITE pen/nodes/{manager_slot}/migrate-home-all "),
        Commands::NodeState { role, manager_slot } => format!("READ {role}/nodes/{manager_slot}/state"),
        Commands::Read { path } => format!("READ {path}"),
        Commands::Write { path, value } => format!("WRITE {path} {value}"),
    };

    let result = roundtrip(&cli.socket, line).await?;
    if !result.is_empty() {
        println!("{result}");
    }
    Ok(())
}
