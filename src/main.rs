//! Entry point for `slipstack`.
//!
//! Parses CLI arguments and serves the chat stack over serial lines
//! tunnelled through TCP connections. All actual protocol work is
//! delegated to library modules; `main.rs` owns only process setup
//! (logging, argument parsing, accepting lines).

use std::net::Ipv4Addr;

use anyhow::{Context, Result};
use clap::Parser;

use slipstack::driver::{run_chat_link, StackConfig};

/// Educational IPv4/TCP-style stack over SLIP-framed serial links.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// TCP address carrying the SLIP-framed serial line.
    #[arg(short, long, default_value = "127.0.0.1:7000")]
    bind: String,

    /// IPv4 address of this node on the serial network.
    #[arg(short, long)]
    addr: Ipv4Addr,

    /// Port the chat service listens on.
    #[arg(short, long, default_value_t = 6667)]
    port: u16,

    /// Routing entry in the form CIDR=NEXTHOP (repeatable).
    #[arg(short, long = "route", value_name = "CIDR=NEXTHOP")]
    routes: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let routes = cli
        .routes
        .iter()
        .map(|entry| {
            entry
                .split_once('=')
                .map(|(cidr, next_hop)| (cidr.to_string(), next_hop.to_string()))
                .with_context(|| format!("route `{entry}` is not CIDR=NEXTHOP"))
        })
        .collect::<Result<Vec<_>>>()?;

    let config = StackConfig {
        local_addr: cli.addr,
        routes,
        chat_port: cli.port,
    };

    let listener = tokio::net::TcpListener::bind(&cli.bind)
        .await
        .with_context(|| format!("binding serial line endpoint {}", cli.bind))?;
    log::info!(
        "node {} serving chat on transport port {}, line endpoint {}",
        config.local_addr,
        config.chat_port,
        cli.bind
    );

    loop {
        let (stream, peer) = listener.accept().await?;
        log::info!("serial line attached from {peer}");
        if let Err(e) = run_chat_link(stream, &config).await {
            log::warn!("serial line error: {e}");
        }
        log::info!("serial line detached");
    }
}
