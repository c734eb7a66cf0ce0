//! minichain: a minimal proof-of-work blockchain node.
//!
//! Fixed-size wire messages, opaque 32-byte address tags, decimal-string
//! numerals, an account ledger derived from the canonical chain, and a
//! per-peer height-by-height synchronization protocol. One node process
//! mines, validates, relays and serves its chain to peers over TCP.

#![forbid(unsafe_code)]

// ===== Primitives =====
pub mod codec;
pub mod error;

// ===== Consensus =====
pub mod block;
pub mod chain;
pub mod ledger;
pub mod mempool;
pub mod miner;
pub mod transaction;

// ===== Networking =====
pub mod network;
pub mod node;
pub mod protocol;
pub mod sync;

// ===== Configuration =====
pub mod config;
