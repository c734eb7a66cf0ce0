#![forbid(unsafe_code)]
//! Submit a transfer transaction to a running node.

use clap::Parser;
use minichain::codec::{tag_from_str, Numeral};
use minichain::protocol::Message;
use minichain::transaction::Transaction;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

#[derive(Parser)]
#[command(name = "minichain-send", about = "Send a transaction to a node")]
struct Args {
    /// Node to submit to (`host:port`).
    #[arg(long, default_value = "127.0.0.1:8444")]
    node: String,

    /// Sender address: 64 hex characters, or a short label tag.
    #[arg(long)]
    sender: String,

    /// Receiver address: 64 hex characters, or a short label tag.
    #[arg(long)]
    receiver: String,

    #[arg(long)]
    amount: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let tx = Transaction::new(
        tag_from_str(&args.sender),
        tag_from_str(&args.receiver),
        Numeral::from_u64(args.amount),
    );
    let mut stream = TcpStream::connect(&args.node).await?;
    stream.write_all(&Message::Transaction(tx).encode(0)).await?;
    println!("submitted transaction {}", tx.hash_str());
    Ok(())
}
