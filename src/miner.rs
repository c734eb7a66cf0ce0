//! Proof-of-work mining.

use crate::block::Block;
use crate::codec::{sha256, Address};
use rand::RngCore;

/// How many nonces to try between abort checks.
const ABORT_CHECK_INTERVAL: u64 = 4096;

/// Search the nonce space until the header hash meets the difficulty target.
///
/// `should_abort` is polled periodically; it reports that the candidate has
/// gone stale (the canonical tip moved), in which case the search stops and
/// the caller rebuilds a candidate on the new tip.
pub fn mine_block(
    mut block: Block,
    difficulty: u32,
    mut should_abort: impl FnMut() -> bool,
) -> Option<Block> {
    let mut tries: u64 = 0;
    loop {
        let hash = block.header.compute_hash();
        if Block::meets_difficulty(&hash, difficulty) {
            block.header.hash = hash;
            return Some(block);
        }
        block.header.nonce = block.header.nonce.incremented();
        tries += 1;
        if tries % ABORT_CHECK_INTERVAL == 0 && should_abort() {
            return None;
        }
    }
}

/// Self-assigned miner address: the hash of fresh random bytes. Addresses
/// are opaque tags, so this is all the identity a miner needs.
pub fn random_miner_address() -> Address {
    let mut seed = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut seed);
    sha256(&seed)
}
