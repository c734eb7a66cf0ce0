//! TCP transport: peer registry, connection tasks and frame reading.
//!
//! Each connection gets its own tokio task. Inbound frames are read with
//! fixed-size `read_exact` calls (every payload length is known from the
//! opcode), decoded, and handed to the node. Outbound frames go through a
//! per-peer unbounded channel drained by a writer task, so consensus code
//! never blocks on a slow peer's socket.

use crate::codec::{Hash32, Numeral, TAG_WIDTH};
use crate::error::{ChainError, Result};
use crate::node::Node;
use crate::protocol::{
    self, Message, PeerEntry, OPCODE_GET_BLOCK, OPCODE_GET_HASH, OPCODE_SEND_BLOCK,
    OPCODE_SEND_PORTS, OPCODE_SEND_TRANSACTION, PEER_ENTRY_WIRE_LEN,
};
use crate::sync::{SyncState, Synchronizer};
use crate::transaction::TRANSACTION_WIRE_LEN;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

pub type PeerId = u64;

/// Cap on a ports message; a registry will never know more peers than this.
const MAX_PEER_ENTRIES: usize = 1024;

/// Registry of live peer connections and their outbound channels.
#[derive(Default)]
pub struct PeerHub {
    peers: Mutex<HashMap<PeerId, UnboundedSender<Vec<u8>>>>,
    next_id: AtomicU64,
}

impl PeerHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    fn register(&self) -> (PeerId, UnboundedReceiver<Vec<u8>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.lock().insert(id, tx);
        (id, rx)
    }

    fn unregister(&self, id: PeerId) {
        self.peers.lock().remove(&id);
    }

    /// Queue a frame for one peer. Silently a no-op if the peer is gone.
    pub fn send_to(&self, id: PeerId, frame: Vec<u8>) {
        if let Some(tx) = self.peers.lock().get(&id) {
            let _ = tx.send(frame);
        }
    }

    pub fn broadcast_except(&self, except: Option<PeerId>, frame: Vec<u8>) {
        for (id, tx) in self.peers.lock().iter() {
            if except == Some(*id) {
                continue;
            }
            let _ = tx.send(frame.clone());
        }
    }
}

/// Accept loop; one connection task per peer, forever.
pub async fn serve(node: Arc<Node>, listener: TcpListener) -> Result<()> {
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        info!(%peer_addr, "peer connected");
        let node = node.clone();
        tokio::spawn(async move {
            match handle_peer(node, stream).await {
                Ok(()) => debug!(%peer_addr, "peer disconnected"),
                Err(e) => debug!(%peer_addr, "peer dropped: {e}"),
            }
        });
    }
}

/// Dial a peer in the background and run the connection task on success.
pub fn spawn_connect(node: Arc<Node>, host: String, port: u16) {
    tokio::spawn(async move {
        match TcpStream::connect((host.as_str(), port)).await {
            Ok(stream) => {
                info!(%host, port, "connected to peer");
                if let Err(e) = handle_peer(node, stream).await {
                    debug!(%host, port, "peer dropped: {e}");
                }
            }
            Err(e) => warn!(%host, port, "failed to connect: {e}"),
        }
    });
}

pub fn split_host_port(addr: &str) -> Option<(String, u16)> {
    let (host, port) = addr.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port.parse().ok()?))
}

async fn handle_peer(node: Arc<Node>, stream: TcpStream) -> Result<()> {
    stream.set_nodelay(true).ok();
    let (mut reader, mut writer) = stream.into_split();
    let (peer_id, mut outbound) = node.hub.register();

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if writer.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    let result = read_loop(&node, peer_id, &mut reader).await;
    node.hub.unregister(peer_id);
    writer_task.abort();
    result
}

/// Read frames until the peer hangs up or sends something malformed.
///
/// The synchronization machine lives here, one per connection; partial sync
/// progress dies with the connection.
async fn read_loop(node: &Arc<Node>, peer_id: PeerId, reader: &mut OwnedReadHalf) -> Result<()> {
    let txs_per_block = node.config.consensus.txs_per_block;
    let mut sync = Synchronizer::new();
    loop {
        // While a hash request is outstanding, the next 32 bytes are the raw
        // reply. Hash replies carry no opcode; the outstanding request is
        // what identifies them. A frame the peer interleaves here (say, a
        // block it broadcast before answering) is misread as the reply and
        // desyncs the stream until a decode error drops the connection,
        // which also discards the partial sync; reconnecting starts clean.
        if sync.state() == SyncState::WaitingForHash {
            let mut hash: Hash32 = [0u8; 32];
            reader.read_exact(&mut hash).await?;
            node.on_hash_reply(peer_id, hash, &mut sync);
            continue;
        }

        let mut opcode = [0u8; 1];
        match reader.read_exact(&mut opcode).await {
            Ok(_) => {}
            // Clean hang-up at a frame boundary.
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        let payload = read_payload(reader, opcode[0], txs_per_block).await?;
        let msg = Message::decode(opcode[0], &payload, txs_per_block)?;
        node.dispatch(peer_id, msg, &mut sync);
    }
}

/// Read the fixed payload that follows `opcode`.
async fn read_payload<R: AsyncRead + Unpin>(
    reader: &mut R,
    opcode: u8,
    txs_per_block: usize,
) -> Result<Vec<u8>> {
    let len = match opcode {
        OPCODE_SEND_TRANSACTION => TRANSACTION_WIRE_LEN,
        OPCODE_SEND_BLOCK => protocol::block_wire_len(txs_per_block),
        OPCODE_GET_BLOCK | OPCODE_GET_HASH => TAG_WIDTH,
        OPCODE_SEND_PORTS => {
            // Count-prefixed, so read in two stages.
            let mut count = [0u8; TAG_WIDTH];
            reader.read_exact(&mut count).await?;
            let entries = Numeral::from_bytes(&count)?.to_u64() as usize;
            if entries > MAX_PEER_ENTRIES {
                return Err(ChainError::MalformedMessage(format!(
                    "ports message claims {entries} entries"
                )));
            }
            let mut body = vec![0u8; entries * PEER_ENTRY_WIRE_LEN];
            reader.read_exact(&mut body).await?;
            let mut payload = count.to_vec();
            payload.extend_from_slice(&body);
            return Ok(payload);
        }
        other => {
            return Err(ChainError::MalformedMessage(format!(
                "unknown opcode {other:#04x}"
            )))
        }
    };
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Enroll with a bootstrap registry: send our own port/tag entry, wait for
/// the ports message it distributes once enough nodes enrolled, then dial
/// everyone on the list.
pub async fn bootstrap_exchange(node: Arc<Node>, addr: &str) -> Result<()> {
    let mut stream = TcpStream::connect(addr).await?;
    let own = PeerEntry {
        port: node.config.network.p2p_port,
        node_tag: node.miner_address,
    };
    stream.write_all(&own.pack()).await?;
    info!(%addr, "enrolled with bootstrap registry");

    let mut opcode = [0u8; 1];
    stream.read_exact(&mut opcode).await?;
    if opcode[0] != OPCODE_SEND_PORTS {
        return Err(ChainError::MalformedMessage(
            "bootstrap registry sent a non-ports reply".to_string(),
        ));
    }
    let payload = read_payload(&mut stream, OPCODE_SEND_PORTS, 0).await?;
    match Message::decode(OPCODE_SEND_PORTS, &payload, 0)? {
        Message::Ports(entries) => {
            info!(peers = entries.len(), "bootstrap exchange complete");
            node.handle_ports(entries);
            Ok(())
        }
        _ => unreachable!("ports opcode decodes to a ports message"),
    }
}
