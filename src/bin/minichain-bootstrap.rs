#![forbid(unsafe_code)]
//! Bootstrap registry: collects one port/tag entry per enrolling node, then
//! distributes the full port list to all of them and exits.

use clap::Parser;
use minichain::protocol::{Message, PeerEntry, PEER_ENTRY_WIRE_LEN};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "minichain-bootstrap", about = "Run a bootstrap registry")]
struct Args {
    /// Port the registry listens on.
    #[arg(long, default_value_t = 8440)]
    port: u16,

    /// Number of nodes to wait for before distributing the port list.
    #[arg(long, default_value_t = 2)]
    peers: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let listener = TcpListener::bind(("0.0.0.0", args.port)).await?;
    info!(port = args.port, expecting = args.peers, "registry listening");

    let mut enrolled = Vec::new();
    while enrolled.len() < args.peers {
        let (mut stream, addr) = listener.accept().await?;
        let mut buf = [0u8; PEER_ENTRY_WIRE_LEN];
        if let Err(e) = stream.read_exact(&mut buf).await {
            warn!(%addr, "dropped incomplete enrollment: {e}");
            continue;
        }
        match PeerEntry::unpack(&buf) {
            Ok(entry) => {
                info!(%addr, port = entry.port, "node enrolled");
                enrolled.push((entry, stream));
            }
            Err(e) => warn!(%addr, "dropped malformed enrollment: {e}"),
        }
    }

    let entries: Vec<PeerEntry> = enrolled.iter().map(|(entry, _)| *entry).collect();
    let frame = Message::Ports(entries).encode(0);
    for (entry, mut stream) in enrolled {
        if let Err(e) = stream.write_all(&frame).await {
            warn!(port = entry.port, "failed to deliver port list: {e}");
        }
    }
    info!("port list distributed");
    Ok(())
}
