//! Per-peer chain synchronization state machine.
//!
//! One machine lives inside each peer connection task. It negotiates
//! height-by-height which blocks the local chain is missing, accumulates the
//! fetched blocks into a branch candidate, and hands the finished branch to
//! the merge engine. Any malformed or unexpected reply resets the machine to
//! `ReadyForNew`; synchronization is retried from scratch on the next
//! height-mismatch detection, never resumed mid-state.

use crate::block::Block;
use crate::chain::Chain;
use crate::codec::{is_zero_hash, Hash32, Numeral};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Idle; no outstanding request.
    ReadyForNew,
    /// Asked the peer for the block hash at `working_height`.
    WaitingForHash,
    /// Asked the peer for the full block at `working_height`.
    WaitingForBlock,
}

/// What the transport should do next on behalf of the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStep {
    RequestHash(Numeral),
    RequestBlock(Numeral),
    /// Every height up to the expected one is fetched; the branch candidate
    /// goes to the merge engine.
    Complete(Vec<Block>),
    /// Nothing to send (idle, fully matched, or the input reset the machine).
    Idle,
}

#[derive(Debug, Default)]
pub struct Synchronizer {
    state: SyncState,
    working_height: Numeral,
    expected_height: Numeral,
    branch: Vec<Block>,
}

impl Default for SyncState {
    fn default() -> Self {
        SyncState::ReadyForNew
    }
}

impl Synchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == SyncState::ReadyForNew
    }

    /// Start catching up: the local chain wants `local_next` next, the peer
    /// advertises a tip at `expected`.
    pub fn begin(&mut self, local_next: Numeral, expected: Numeral) -> SyncStep {
        if self.state != SyncState::ReadyForNew || expected.smaller_than(&local_next) {
            return SyncStep::Idle;
        }
        self.working_height = local_next;
        self.expected_height = expected;
        self.state = SyncState::WaitingForHash;
        SyncStep::RequestHash(self.working_height)
    }

    /// Handle a hash reply. A hash we already hold at that height advances
    /// the negotiation without refetching; anything else asks for the block.
    pub fn on_hash(&mut self, hash: Hash32, chain: &Chain) -> SyncStep {
        if self.state != SyncState::WaitingForHash {
            self.reset();
            return SyncStep::Idle;
        }
        // A zero hash means the peer has nothing at this height after all.
        if is_zero_hash(&hash) {
            self.reset();
            return SyncStep::Idle;
        }
        // Once a branch has started to accumulate, every further block is
        // needed to keep it contiguous, matching local hash or not.
        if self.branch.is_empty() && chain.hash_at(&self.working_height) == Some(hash) {
            if self.working_height == self.expected_height {
                self.reset();
                return SyncStep::Idle;
            }
            self.working_height = self.working_height.incremented();
            return SyncStep::RequestHash(self.working_height);
        }
        self.state = SyncState::WaitingForBlock;
        SyncStep::RequestBlock(self.working_height)
    }

    /// Handle a full block reply at the working height.
    pub fn on_block(&mut self, block: Block) -> SyncStep {
        if self.state != SyncState::WaitingForBlock {
            self.reset();
            return SyncStep::Idle;
        }
        if block.header.height != self.working_height {
            self.reset();
            return SyncStep::Idle;
        }
        self.branch.push(block);
        if self.working_height == self.expected_height {
            let branch = std::mem::take(&mut self.branch);
            self.reset();
            return SyncStep::Complete(branch);
        }
        self.working_height = self.working_height.incremented();
        self.state = SyncState::WaitingForHash;
        SyncStep::RequestHash(self.working_height)
    }

    /// Discard all partial progress and return to idle.
    pub fn reset(&mut self) {
        self.state = SyncState::ReadyForNew;
        self.working_height = Numeral::zero();
        self.expected_height = Numeral::zero();
        self.branch.clear();
    }
}
