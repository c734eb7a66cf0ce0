//! Node orchestration: shared consensus state, message dispatch, mining loop.
//!
//! Lock discipline: the chain lock (which covers the ledger) is always taken
//! before the mempool lock, and every merge or acceptance runs entirely
//! inside one chain write guard, so readers observe either the full
//! pre-reorg or full post-reorg state, never an intermediate. Guards are
//! never held across an `.await`.

use crate::block::Block;
use crate::chain::{BlockOutcome, Chain, ChainParams};
use crate::codec::{hash_to_string, tag_to_string, Address, Hash32, Numeral};
use crate::config::Config;
use crate::error::{ChainError, Result};
use crate::mempool::Mempool;
use crate::miner::{mine_block, random_miner_address};
use crate::network::{self, PeerHub, PeerId};
use crate::protocol::{Message, PeerEntry};
use crate::sync::{SyncState, SyncStep, Synchronizer};
use crate::transaction::Transaction;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

pub struct Node {
    pub config: Config,
    pub chain: RwLock<Chain>,
    pub mempool: Mutex<Mempool>,
    pub hub: PeerHub,
    pub miner_address: Address,
}

/// Work left to do after the chain lock is released.
enum PostAccept {
    Broadcast,
    BeginSync { next: Numeral, target: Numeral },
    Nothing,
}

impl Node {
    pub fn new(config: Config) -> Arc<Self> {
        let params = ChainParams {
            difficulty: config.consensus.difficulty,
            block_reward: Numeral::from_u64(config.consensus.block_reward),
            txs_per_block: config.consensus.txs_per_block,
        };
        Arc::new(Node {
            chain: RwLock::new(Chain::new(params)),
            mempool: Mutex::new(Mempool::new()),
            hub: PeerHub::new(),
            miner_address: random_miner_address(),
            config,
        })
    }

    /// Bind the listener, kick off bootstrap and the miner, then serve peers
    /// until the process ends.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.network.p2p_port)).await?;
        info!(
            port = self.config.network.p2p_port,
            miner = %tag_to_string(&self.miner_address),
            "node listening"
        );

        if let Some(addr) = self.config.network.bootstrap_addr.clone() {
            let node = self.clone();
            tokio::spawn(async move {
                if let Err(e) = network::bootstrap_exchange(node, &addr).await {
                    warn!(%addr, "bootstrap exchange failed: {e}");
                }
            });
        }
        for peer in self.config.network.bootstrap_peers.clone() {
            match network::split_host_port(&peer) {
                Some((host, port)) => network::spawn_connect(self.clone(), host, port),
                None => warn!(%peer, "ignoring malformed peer address"),
            }
        }

        if self.config.miner.enabled {
            let node = self.clone();
            std::thread::spawn(move || node.mining_loop());
        }

        network::serve(self, listener).await
    }

    /// Route one decoded message from a peer. `sync` is that peer's own
    /// synchronization machine, owned by its connection task.
    pub fn dispatch(self: &Arc<Self>, from: PeerId, msg: Message, sync: &mut Synchronizer) {
        match msg {
            Message::Transaction(tx) => self.handle_transaction(tx),
            Message::Block(block) => self.handle_block(from, block, sync),
            Message::GetBlock(height) => {
                let reply = self.chain.read().block_at(&height).cloned();
                match reply {
                    Some(block) => self.hub.send_to(from, self.encode(Message::Block(block))),
                    None => debug!(%height, "no block at requested height"),
                }
            }
            Message::GetHash(height) => {
                // Hash replies travel raw: the requester's sync machine knows
                // one is due. A zero hash says we hold nothing at that height.
                let hash = self.chain.read().hash_at(&height).unwrap_or([0u8; 32]);
                self.hub.send_to(from, hash.to_vec());
            }
            Message::Ports(entries) => self.handle_ports(entries),
        }
    }

    /// Raw 32-byte reply to an outstanding hash request.
    pub fn on_hash_reply(self: &Arc<Self>, from: PeerId, hash: Hash32, sync: &mut Synchronizer) {
        let step = {
            let chain = self.chain.read();
            sync.on_hash(hash, &chain)
        };
        self.advance_sync(from, step, sync);
    }

    /// Dial every peer learned from the bootstrap exchange, skipping
    /// ourselves. The exchange carries ports, not host addresses; peers are
    /// reachable on the loopback of the same host.
    pub fn handle_ports(self: &Arc<Self>, entries: Vec<PeerEntry>) {
        for entry in entries {
            if entry.port == self.config.network.p2p_port || entry.node_tag == self.miner_address {
                continue;
            }
            network::spawn_connect(self.clone(), "127.0.0.1".to_string(), entry.port);
        }
    }

    fn handle_transaction(&self, tx: Transaction) {
        let chain = self.chain.read();
        let mut mempool = self.mempool.lock();
        match mempool.submit(tx, &chain) {
            Ok(()) => debug!(tx = %tx.hash_str(), "transaction admitted"),
            Err(e) => debug!(tx = %tx.hash_str(), "transaction rejected: {e}"),
        }
    }

    fn handle_block(self: &Arc<Self>, from: PeerId, block: Block, sync: &mut Synchronizer) {
        // Blocks arriving while this peer's sync machine awaits one belong
        // to the sync flow, not to direct acceptance.
        if sync.state() == SyncState::WaitingForBlock {
            let step = sync.on_block(block);
            self.advance_sync(from, step, sync);
            return;
        }

        let after = {
            let mut chain = self.chain.write();
            match chain.accept_block(block.clone()) {
                Ok(BlockOutcome::Extended) => {
                    self.mempool.lock().purge(&block, chain.ledger());
                    PostAccept::Broadcast
                }
                Ok(BlockOutcome::NeedsSync { target_height }) => PostAccept::BeginSync {
                    next: chain.next_height(),
                    target: target_height,
                },
                Ok(BlockOutcome::Duplicate) | Ok(BlockOutcome::Stale) => PostAccept::Nothing,
                // accept_block never reorganizes on its own.
                Ok(BlockOutcome::Reorganized { .. }) => PostAccept::Nothing,
                Err(e) => {
                    warn!(peer = from, "rejected block: {e}");
                    PostAccept::Nothing
                }
            }
        };

        match after {
            PostAccept::Broadcast => self.broadcast_block(&block, Some(from)),
            PostAccept::BeginSync { next, target } => {
                let step = sync.begin(next, target);
                self.advance_sync(from, step, sync);
            }
            PostAccept::Nothing => {}
        }
    }

    /// Turn a sync-machine step into wire traffic or a branch merge.
    fn advance_sync(self: &Arc<Self>, peer: PeerId, step: SyncStep, sync: &mut Synchronizer) {
        match step {
            SyncStep::RequestHash(height) => {
                self.hub.send_to(peer, self.encode(Message::GetHash(height)))
            }
            SyncStep::RequestBlock(height) => {
                self.hub.send_to(peer, self.encode(Message::GetBlock(height)))
            }
            SyncStep::Complete(branch) => self.complete_sync(peer, branch, sync),
            SyncStep::Idle => {}
        }
    }

    fn complete_sync(self: &Arc<Self>, peer: PeerId, branch: Vec<Block>, sync: &mut Synchronizer) {
        let tip = match branch.last() {
            Some(block) => block.clone(),
            None => return,
        };
        let target = tip.header.height;

        enum Merge {
            Adopted,
            ForksDeeper,
            Dropped,
        }
        let merged = {
            let mut chain = self.chain.write();
            match chain.merge_branch(branch) {
                Ok(BlockOutcome::Extended) => {
                    self.mempool.lock().revalidate(&chain);
                    Merge::Adopted
                }
                Ok(BlockOutcome::Reorganized { reverted }) => {
                    let mut mempool = self.mempool.lock();
                    mempool.reinstate(&reverted, &chain);
                    mempool.revalidate(&chain);
                    Merge::Adopted
                }
                Ok(_) => Merge::Dropped,
                Err(ChainError::UnknownAncestor(_)) => Merge::ForksDeeper,
                Err(e) => {
                    warn!(peer, "branch merge failed: {e}");
                    Merge::Dropped
                }
            }
        };
        match merged {
            Merge::Adopted => self.broadcast_block(&tip, Some(peer)),
            // The peer's chain forks below everything fetched so far.
            // Renegotiate from genesis: matching hashes skip the shared
            // prefix, and the branch that comes back starts right above it,
            // anchored to a block we hold.
            Merge::ForksDeeper => {
                debug!(peer, %target, "branch forks below the fetched range; restarting from genesis");
                let step = sync.begin(Numeral::zero(), target);
                self.advance_sync(peer, step, sync);
            }
            Merge::Dropped => {}
        }
    }

    fn broadcast_block(&self, block: &Block, except: Option<PeerId>) {
        self.hub
            .broadcast_except(except, self.encode(Message::Block(block.clone())));
    }

    fn encode(&self, msg: Message) -> Vec<u8> {
        msg.encode(self.config.consensus.txs_per_block)
    }

    /// Background mining loop, one per node, on its own OS thread so nonce
    /// grinding never starves the async transport.
    fn mining_loop(&self) {
        info!(miner = %tag_to_string(&self.miner_address), "miner started");
        loop {
            let (candidate, difficulty, prior) = {
                let chain = self.chain.read();
                let mempool = self.mempool.lock();
                let batch = mempool.select_batch(chain.params().txs_per_block, chain.ledger());
                let prior = chain.tip_hash();
                (
                    Block::new(chain.next_height(), prior, self.miner_address, batch),
                    chain.params().difficulty,
                    prior,
                )
            };

            let mined = mine_block(candidate, difficulty, || {
                self.chain.read().tip_hash() != prior
            });
            let block = match mined {
                Some(block) => block,
                // Tip moved mid-search; rebuild on the new tip.
                None => continue,
            };

            let accepted = {
                let mut chain = self.chain.write();
                match chain.accept_block(block.clone()) {
                    Ok(BlockOutcome::Extended) => {
                        self.mempool.lock().purge(&block, chain.ledger());
                        true
                    }
                    Ok(outcome) => {
                        debug!("mined block superseded: {outcome:?}");
                        false
                    }
                    Err(e) => {
                        warn!("mined block rejected: {e}");
                        false
                    }
                }
            };
            if accepted {
                info!(
                    height = %block.header.height,
                    hash = %hash_to_string(&block.header.hash),
                    txs = block.transactions.len(),
                    "mined block"
                );
                self.broadcast_block(&block, None);
            }
        }
    }
}
