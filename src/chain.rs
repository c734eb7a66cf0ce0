//! Chain store and the block merge / reorg engine.
//!
//! The `Chain` owns the canonical block history and the ledger derived from
//! it. All validation runs against trial copies of the ledger; canonical
//! state is only touched once a block or branch has validated in full, so a
//! failure anywhere leaves the node exactly where it was.

use crate::block::Block;
use crate::codec::{hash_to_string, is_zero_hash, Hash32, Numeral};
use crate::error::{ChainError, Result};
use crate::ledger::Ledger;
use std::collections::{HashMap, HashSet};
use tracing::info;

#[derive(Debug, Clone)]
pub struct ChainParams {
    /// Required leading zero bits on a block hash.
    pub difficulty: u32,
    /// Minted to the miner address of every accepted block.
    pub block_reward: Numeral,
    /// Upper bound on transactions per block; also fixes the wire size of a
    /// block message.
    pub txs_per_block: usize,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            difficulty: 16,
            block_reward: Numeral::from_u64(100),
            txs_per_block: 100,
        }
    }
}

/// How an incoming block relates to the canonical chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    /// The block extended the canonical tip.
    Extended,
    /// A branch replaced the canonical suffix. The reverted blocks are
    /// returned so their transactions can be offered back to the mempool.
    Reorganized { reverted: Vec<Block> },
    /// Already in the store; nothing to do.
    Duplicate,
    /// Shorter, or tied with the chain we already hold. Ties never
    /// reorganize: first seen wins.
    Stale,
    /// The block claims a height beyond our tip and does not attach to it;
    /// the sync machine must fetch the gap from the peer.
    NeedsSync { target_height: Numeral },
}

pub struct Chain {
    params: ChainParams,
    blocks: Vec<Block>,
    index: HashMap<Hash32, u64>,
    tx_index: HashSet<Hash32>,
    ledger: Ledger,
}

impl Chain {
    pub fn new(params: ChainParams) -> Self {
        Chain {
            params,
            blocks: Vec::new(),
            index: HashMap::new(),
            tx_index: HashSet::new(),
            ledger: Ledger::new(),
        }
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn tip(&self) -> Option<&Block> {
        self.blocks.last()
    }

    /// Hash of the tip block, or the all-zero hash for an empty chain so the
    /// genesis linkage check is uniform.
    pub fn tip_hash(&self) -> Hash32 {
        self.blocks.last().map(Block::hash).unwrap_or([0u8; 32])
    }

    pub fn tip_height(&self) -> Option<Numeral> {
        self.blocks.last().map(|b| b.header.height)
    }

    /// Height the next extension block must carry.
    pub fn next_height(&self) -> Numeral {
        Numeral::from_u64(self.blocks.len() as u64)
    }

    pub fn block_at(&self, height: &Numeral) -> Option<&Block> {
        self.blocks.get(height.to_u64() as usize)
    }

    pub fn hash_at(&self, height: &Numeral) -> Option<Hash32> {
        self.block_at(height).map(Block::hash)
    }

    pub fn contains_block(&self, hash: &Hash32) -> bool {
        self.index.contains_key(hash)
    }

    pub fn contains_transaction(&self, hash: &Hash32) -> bool {
        self.tx_index.contains(hash)
    }

    /// Recompute the header hash and hold it against the claimed hash and
    /// the difficulty threshold. Fails closed.
    pub fn check_proof_of_work(&self, block: &Block) -> Result<()> {
        let computed = block.header.compute_hash();
        if computed != block.header.hash {
            return Err(ChainError::InvalidProofOfWork);
        }
        if !Block::meets_difficulty(&computed, self.params.difficulty) {
            return Err(ChainError::InvalidProofOfWork);
        }
        Ok(())
    }

    /// Evaluate a block received from the network or the local miner.
    /// No state changes unless the block fully validates as an extension.
    pub fn accept_block(&mut self, block: Block) -> Result<BlockOutcome> {
        self.check_proof_of_work(&block)?;

        if self.contains_block(&block.header.hash) {
            return Ok(BlockOutcome::Duplicate);
        }

        let next = self.next_height();
        if block.header.height == next && block.header.prior_hash == self.tip_hash() {
            let mut trial = self.ledger.clone();
            let mut seen = HashSet::new();
            self.apply_block(&block, &mut trial, &HashSet::new(), &mut seen)?;
            self.ledger = trial;
            info!(
                height = %block.header.height,
                hash = %hash_to_string(&block.header.hash),
                txs = block.transactions.len(),
                "block accepted"
            );
            self.push_block(block);
            return Ok(BlockOutcome::Extended);
        }

        if block.header.height.smaller_than(&next) {
            return Ok(BlockOutcome::Stale);
        }

        Ok(BlockOutcome::NeedsSync {
            target_height: block.header.height,
        })
    }

    /// Replace the canonical suffix with `branch` if it is strictly longer.
    ///
    /// The branch must be contiguous, anchored to a block we hold (or to
    /// genesis), and every block must carry valid proof-of-work and valid
    /// transactions. Atomicity: validation runs against a trial ledger and
    /// the canonical vectors are only rewritten after the whole branch
    /// passed, so an invalid block anywhere aborts with no effect.
    pub fn merge_branch(&mut self, branch: Vec<Block>) -> Result<BlockOutcome> {
        let first = match branch.first() {
            Some(b) => b,
            None => return Err(ChainError::InvalidBlock("empty branch".to_string())),
        };

        for (i, block) in branch.iter().enumerate() {
            self.check_proof_of_work(block)?;
            if i > 0 {
                let prev = &branch[i - 1];
                if block.header.prior_hash != prev.header.hash
                    || block.header.height != prev.header.height.incremented()
                {
                    return Err(ChainError::InvalidBlock(
                        "branch blocks are not contiguous".to_string(),
                    ));
                }
            }
        }

        let fork_height = first.header.height;
        if fork_height.is_zero() {
            if !is_zero_hash(&first.header.prior_hash) {
                return Err(ChainError::InvalidBlock(
                    "genesis block must carry a zero prior hash".to_string(),
                ));
            }
        } else {
            let parent_height = fork_height.sub(&Numeral::one());
            match self.hash_at(&parent_height) {
                Some(hash) if hash == first.header.prior_hash => {}
                _ => {
                    return Err(ChainError::UnknownAncestor(format!(
                        "no local block matches the branch prior hash at height {parent_height}"
                    )))
                }
            }
        }

        let branch_tip_height = branch[branch.len() - 1].header.height;
        if let Some(tip_height) = self.tip_height() {
            if !tip_height.smaller_than(&branch_tip_height) {
                return Ok(BlockOutcome::Stale);
            }
        }

        let fork_at = fork_height.to_u64() as usize;

        // Unwind the canonical suffix on a trial ledger, newest first.
        let mut trial = self.ledger.clone();
        for block in self.blocks[fork_at..].iter().rev() {
            self.revert_block(block, &mut trial)?;
        }
        let reverted_txs: HashSet<Hash32> = self.blocks[fork_at..]
            .iter()
            .flat_map(|b| b.transactions.iter().map(|tx| tx.hash()))
            .collect();

        // Replay the branch forward; the first invalid block aborts the
        // whole merge with canonical state untouched.
        let mut seen = HashSet::new();
        for block in &branch {
            self.apply_block(block, &mut trial, &reverted_txs, &mut seen)?;
        }

        // Commit.
        let reverted = self.blocks.split_off(fork_at);
        for block in &reverted {
            self.index.remove(&block.header.hash);
            for tx in &block.transactions {
                self.tx_index.remove(&tx.hash());
            }
        }
        let added = branch.len();
        for block in branch {
            self.push_block(block);
        }
        self.ledger = trial;
        if reverted.is_empty() {
            info!(new_tip = %branch_tip_height, added, "chain extended by synced branch");
            return Ok(BlockOutcome::Extended);
        }
        info!(
            fork_height = %fork_height,
            new_tip = %branch_tip_height,
            reverted = reverted.len(),
            added,
            "chain reorganized"
        );
        Ok(BlockOutcome::Reorganized { reverted })
    }

    /// Validate a block's transactions sequentially against `ledger`,
    /// applying each one so intra-block double-spends are caught, then
    /// credit the mining reward. `excluded` holds transaction hashes whose
    /// canonical record is being reverted by the surrounding merge; `seen`
    /// spans the blocks applied so far in that merge.
    fn apply_block(
        &self,
        block: &Block,
        ledger: &mut Ledger,
        excluded: &HashSet<Hash32>,
        seen: &mut HashSet<Hash32>,
    ) -> Result<()> {
        if block.transactions.len() > self.params.txs_per_block {
            return Err(ChainError::InvalidBlock(format!(
                "{} transactions exceeds the per-block limit of {}",
                block.transactions.len(),
                self.params.txs_per_block
            )));
        }
        for tx in &block.transactions {
            let hash = tx.hash();
            if self.tx_index.contains(&hash) && !excluded.contains(&hash) {
                return Err(ChainError::DuplicateTransaction);
            }
            if !seen.insert(hash) {
                return Err(ChainError::DuplicateTransaction);
            }
            ledger.apply(tx)?;
        }
        ledger.credit(&block.header.miner, &self.params.block_reward);
        Ok(())
    }

    /// Exact inverse of `apply_block`: take back the reward, then revert the
    /// transactions in reverse order.
    fn revert_block(&self, block: &Block, ledger: &mut Ledger) -> Result<()> {
        ledger.debit(&block.header.miner, &self.params.block_reward)?;
        for tx in block.transactions.iter().rev() {
            ledger.revert(tx)?;
        }
        Ok(())
    }

    fn push_block(&mut self, block: Block) {
        self.index
            .insert(block.header.hash, block.header.height.to_u64());
        for tx in &block.transactions {
            self.tx_index.insert(tx.hash());
        }
        self.blocks.push(block);
    }
}
