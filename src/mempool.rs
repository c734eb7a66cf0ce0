//! Pending transaction pool and admission checks.

use crate::block::Block;
use crate::chain::Chain;
use crate::codec::Hash32;
use crate::error::{ChainError, Result};
use crate::ledger::Ledger;
use crate::transaction::Transaction;
use std::collections::HashMap;
use tracing::debug;

/// Transactions received but not yet included in an accepted block, keyed by
/// content hash, with insertion order preserved for block assembly.
#[derive(Debug, Clone, Default)]
pub struct Mempool {
    transactions: HashMap<Hash32, Transaction>,
    order: Vec<Hash32>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, hash: &Hash32) -> bool {
        self.transactions.contains_key(hash)
    }

    /// Admission check order: duplicate (pending or already recorded in the
    /// canonical chain), then sender balance, then insert.
    pub fn submit(&mut self, tx: Transaction, chain: &Chain) -> Result<()> {
        let hash = tx.hash();
        if self.transactions.contains_key(&hash) || chain.contains_transaction(&hash) {
            return Err(ChainError::DuplicateTransaction);
        }
        if chain.ledger().balance(&tx.sender).smaller_than(&tx.amount) {
            return Err(ChainError::InsufficientFunds);
        }
        self.order.push(hash);
        self.transactions.insert(hash, tx);
        Ok(())
    }

    /// Up to `max_count` pending transactions in insertion order, replayed
    /// against a scratch copy of `ledger` so the batch validates as a block.
    /// Admission checks each transaction alone; here the running balance
    /// decides, and a transaction the picks so far leave uncovered is
    /// skipped, not selected into a doomed block. Nothing is removed: a
    /// failed mining attempt must not lose transactions.
    pub fn select_batch(&self, max_count: usize, ledger: &Ledger) -> Vec<Transaction> {
        let mut scratch = ledger.clone();
        let mut batch = Vec::new();
        for hash in &self.order {
            if batch.len() == max_count {
                break;
            }
            if let Some(tx) = self.transactions.get(hash) {
                if scratch.apply(tx).is_ok() {
                    batch.push(*tx);
                }
            }
        }
        batch
    }

    /// Drop every transaction included in an accepted block, then replay the
    /// remainder against the post-block ledger and evict whatever a sender
    /// can no longer cover.
    pub fn purge(&mut self, block: &Block, ledger: &Ledger) {
        for tx in &block.transactions {
            self.remove(&tx.hash());
        }
        self.replay_evict(ledger);
    }

    /// Offer the transactions of reorg-reverted blocks back to the pool.
    /// Transactions also present in the new canonical branch, or no longer
    /// funded, are silently dropped.
    pub fn reinstate(&mut self, reverted: &[Block], chain: &Chain) {
        for block in reverted {
            for tx in &block.transactions {
                if let Err(e) = self.submit(*tx, chain) {
                    debug!(tx = %tx.hash_str(), "dropped reverted transaction: {e}");
                }
            }
        }
    }

    /// Full revalidation after a reorg: drop what the new canonical chain
    /// already records, then replay against its ledger.
    pub fn revalidate(&mut self, chain: &Chain) {
        let recorded: Vec<Hash32> = self
            .order
            .iter()
            .filter(|hash| chain.contains_transaction(hash))
            .copied()
            .collect();
        for hash in recorded {
            self.remove(&hash);
        }
        self.replay_evict(chain.ledger());
    }

    fn replay_evict(&mut self, ledger: &Ledger) {
        let mut scratch = ledger.clone();
        let mut evict = Vec::new();
        for hash in &self.order {
            if let Some(tx) = self.transactions.get(hash) {
                if scratch.apply(tx).is_err() {
                    evict.push(*hash);
                }
            }
        }
        for hash in evict {
            debug!(tx = %hex::encode(hash), "evicting unfunded transaction");
            self.remove(&hash);
        }
    }

    fn remove(&mut self, hash: &Hash32) {
        if self.transactions.remove(hash).is_some() {
            self.order.retain(|h| h != hash);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{Chain, ChainParams};
    use crate::codec::{tag_from_str, Numeral};
    use crate::miner::mine_block;

    fn chain_with_funds(owner: &str) -> Chain {
        let params = ChainParams {
            difficulty: 0,
            block_reward: Numeral::from_u64(100),
            txs_per_block: 10,
        };
        let mut chain = Chain::new(params);
        let genesis = mine_block(
            Block::new(chain.next_height(), chain.tip_hash(), tag_from_str(owner), vec![]),
            0,
            || false,
        )
        .unwrap();
        chain.accept_block(genesis).unwrap();
        chain
    }

    fn tx(sender: &str, receiver: &str, amount: u64) -> Transaction {
        Transaction::new(
            tag_from_str(sender),
            tag_from_str(receiver),
            Numeral::from_u64(amount),
        )
    }

    #[test]
    fn test_submit_rejects_duplicates() {
        let chain = chain_with_funds("alice");
        let mut pool = Mempool::new();
        let transfer = tx("alice", "bob", 10);

        pool.submit(transfer, &chain).unwrap();
        assert!(matches!(
            pool.submit(transfer, &chain),
            Err(ChainError::DuplicateTransaction)
        ));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_submit_rejects_unfunded_sender() {
        let chain = chain_with_funds("alice");
        let mut pool = Mempool::new();

        assert!(matches!(
            pool.submit(tx("mallory", "bob", 1), &chain),
            Err(ChainError::InsufficientFunds)
        ));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_submit_rejects_chain_recorded_transaction() {
        let mut chain = chain_with_funds("alice");
        let transfer = tx("alice", "bob", 10);
        let block = mine_block(
            Block::new(
                chain.next_height(),
                chain.tip_hash(),
                tag_from_str("miner"),
                vec![transfer],
            ),
            0,
            || false,
        )
        .unwrap();
        chain.accept_block(block).unwrap();

        let mut pool = Mempool::new();
        assert!(matches!(
            pool.submit(transfer, &chain),
            Err(ChainError::DuplicateTransaction)
        ));
    }

    #[test]
    fn test_select_batch_preserves_insertion_order() {
        let chain = chain_with_funds("alice");
        let mut pool = Mempool::new();
        let first = tx("alice", "bob", 1);
        let second = tx("alice", "carol", 2);
        let third = tx("alice", "dave", 3);
        pool.submit(first, &chain).unwrap();
        pool.submit(second, &chain).unwrap();
        pool.submit(third, &chain).unwrap();

        let batch = pool.select_batch(2, chain.ledger());
        assert_eq!(batch, vec![first, second]);
        // Selection does not drain the pool.
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_select_batch_skips_collectively_overspending() {
        let chain = chain_with_funds("alice");
        let mut pool = Mempool::new();
        // Each transfer is covered alone, not together; admission takes both.
        let first = tx("alice", "bob", 60);
        let second = tx("alice", "carol", 60);
        pool.submit(first, &chain).unwrap();
        pool.submit(second, &chain).unwrap();

        // The batch keeps the earlier transfer and skips the one the running
        // balance cannot cover, so the mined block validates.
        let batch = pool.select_batch(10, chain.ledger());
        assert_eq!(batch, vec![first]);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_purge_removes_included_and_unfunded() {
        let mut chain = chain_with_funds("alice");
        let mut pool = Mempool::new();
        let included = tx("alice", "bob", 60);
        let starved = tx("alice", "carol", 60); // covered now, not after `included` lands
        pool.submit(included, &chain).unwrap();
        pool.submit(starved, &chain).unwrap();

        let block = mine_block(
            Block::new(
                chain.next_height(),
                chain.tip_hash(),
                tag_from_str("miner"),
                vec![included],
            ),
            0,
            || false,
        )
        .unwrap();
        chain.accept_block(block.clone()).unwrap();
        pool.purge(&block, chain.ledger());

        assert!(pool.is_empty());
    }
}
