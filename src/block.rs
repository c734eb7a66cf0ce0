//! Block structure, header hashing and the difficulty predicate.

use crate::codec::{Address, Hash32, Numeral, TAG_WIDTH};
use crate::transaction::Transaction;
use sha2::{Digest, Sha256};

/// Packed header wire size: nonce, prior hash, hash, height, miner address.
pub const BLOCK_HEADER_WIRE_LEN: usize = 5 * TAG_WIDTH;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub nonce: Numeral,
    pub prior_hash: Hash32,
    /// Claimed header hash; `compute_hash` must reproduce it.
    pub hash: Hash32,
    pub height: Numeral,
    pub miner: Address,
}

impl BlockHeader {
    /// Hash over every header field except the hash itself.
    pub fn compute_hash(&self) -> Hash32 {
        let mut hasher = Sha256::new();
        hasher.update(self.nonce.as_bytes());
        hasher.update(self.prior_hash);
        hasher.update(self.height.as_bytes());
        hasher.update(self.miner);
        hasher.finalize().into()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Build an unmined candidate: nonce zero, hash unset.
    pub fn new(
        height: Numeral,
        prior_hash: Hash32,
        miner: Address,
        transactions: Vec<Transaction>,
    ) -> Self {
        Block {
            header: BlockHeader {
                nonce: Numeral::zero(),
                prior_hash,
                hash: [0u8; 32],
                height,
                miner,
            },
            transactions,
        }
    }

    pub fn hash(&self) -> Hash32 {
        self.header.hash
    }

    /// Derive the acceptance threshold from a leading-zero-bits difficulty.
    pub fn difficulty_target(difficulty: u32) -> [u8; 32] {
        let mut target = [0xFF; 32];
        let leading_zeros = difficulty / 8;
        let partial_bits = difficulty % 8;

        for item in target.iter_mut().take(leading_zeros as usize) {
            *item = 0;
        }

        if leading_zeros < 32 && partial_bits > 0 {
            target[leading_zeros as usize] = (0xFF >> partial_bits) as u8;
        }
        target
    }

    pub fn meets_difficulty(hash: &Hash32, difficulty: u32) -> bool {
        *hash <= Self::difficulty_target(difficulty)
    }
}
