#![forbid(unsafe_code)]
//! Full node: validates, mines, relays and serves the chain to peers.

use clap::Parser;
use minichain::config::load_config;
use minichain::node::Node;

#[derive(Parser)]
#[command(name = "minichain-node", about = "Run a minichain node")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "minichain.toml")]
    config: String,

    /// Override the listen port from the config file.
    #[arg(long)]
    port: Option<u16>,

    /// Override the difficulty (leading zero bits) from the config file.
    #[arg(long)]
    difficulty: Option<u32>,

    /// Override the transactions-per-block limit from the config file.
    #[arg(long)]
    txs_per_block: Option<usize>,

    /// Mine blocks on this node.
    #[arg(long)]
    mine: bool,

    /// Bootstrap registry address (`host:port`) for the port exchange.
    #[arg(long)]
    bootstrap: Option<String>,

    /// Peer to dial directly at startup (`host:port`); repeatable.
    #[arg(long)]
    peer: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut config = load_config(&args.config)?;
    if let Some(port) = args.port {
        config.network.p2p_port = port;
    }
    if let Some(difficulty) = args.difficulty {
        config.consensus.difficulty = difficulty;
    }
    if let Some(txs_per_block) = args.txs_per_block {
        config.consensus.txs_per_block = txs_per_block;
    }
    if args.mine {
        config.miner.enabled = true;
    }
    if args.bootstrap.is_some() {
        config.network.bootstrap_addr = args.bootstrap;
    }
    config.network.bootstrap_peers.extend(args.peer);

    let node = Node::new(config);
    node.start().await?;
    Ok(())
}
