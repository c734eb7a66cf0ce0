//! End-to-end consensus scenarios run against the library surface: chain,
//! ledger, mempool, miner and the per-peer synchronizer working together.

use minichain::block::Block;
use minichain::chain::{BlockOutcome, Chain, ChainParams};
use minichain::codec::{tag_from_str, Address, Numeral};
use minichain::error::ChainError;
use minichain::mempool::Mempool;
use minichain::miner::mine_block;
use minichain::sync::{SyncStep, Synchronizer};
use minichain::transaction::Transaction;

fn params(reward: u64) -> ChainParams {
    ChainParams {
        difficulty: 0,
        block_reward: Numeral::from_u64(reward),
        txs_per_block: 10,
    }
}

fn mine_on(chain: &mut Chain, miner: Address, txs: Vec<Transaction>) -> Block {
    let candidate = Block::new(chain.next_height(), chain.tip_hash(), miner, txs);
    let block = mine_block(candidate, chain.params().difficulty, || false).unwrap();
    assert_eq!(
        chain.accept_block(block.clone()).unwrap(),
        BlockOutcome::Extended
    );
    block
}

fn transfer(sender: &str, receiver: &str, amount: u64) -> Transaction {
    Transaction::new(
        tag_from_str(sender),
        tag_from_str(receiver),
        Numeral::from_u64(amount),
    )
}

/// Drive `sync` against `peer` the way a connection task does: answer hash
/// requests with the peer's hashes, block requests with its blocks, merge
/// the completed branch, and renegotiate from genesis when the branch forks
/// below everything fetched so far.
fn sync_with(local: &mut Chain, peer: &Chain, target: Numeral) -> BlockOutcome {
    let mut sync = Synchronizer::new();
    let mut step = sync.begin(local.next_height(), target);
    let mut rounds = 0;
    loop {
        rounds += 1;
        assert!(rounds < 500, "synchronization did not converge");
        step = match step {
            SyncStep::RequestHash(height) => {
                sync.on_hash(peer.hash_at(&height).unwrap_or([0u8; 32]), local)
            }
            SyncStep::RequestBlock(height) => {
                sync.on_block(peer.block_at(&height).unwrap().clone())
            }
            SyncStep::Complete(branch) => match local.merge_branch(branch) {
                Ok(outcome) => return outcome,
                Err(ChainError::UnknownAncestor(_)) => sync.begin(Numeral::zero(), target),
                Err(e) => panic!("merge failed: {e}"),
            },
            SyncStep::Idle => panic!("machine went idle before completing"),
        };
    }
}

#[test]
fn reward_funds_a_later_spend() {
    let alice = tag_from_str("alice");
    let bob = tag_from_str("bob");
    let mut chain = Chain::new(params(10));
    let mut pool = Mempool::new();

    // Alice starts from nothing; the transfer cannot be admitted.
    let spend = transfer("alice", "bob", 10);
    assert!(matches!(
        pool.submit(spend, &chain),
        Err(ChainError::InsufficientFunds)
    ));

    // One mined block pays Alice the reward; now the transfer is covered.
    mine_on(&mut chain, alice, vec![]);
    pool.submit(spend, &chain).unwrap();

    let batch = pool.select_batch(chain.params().txs_per_block, chain.ledger());
    assert_eq!(batch, vec![spend]);
    let block = mine_on(&mut chain, tag_from_str("someone-else"), batch);
    pool.purge(&block, chain.ledger());

    assert!(pool.is_empty());
    assert_eq!(chain.ledger().balance(&alice), Numeral::zero());
    assert_eq!(chain.ledger().balance(&bob), Numeral::from_u64(10));
}

#[test]
fn equal_height_fork_keeps_first_seen_block() {
    let shared = params(100);
    let mut chain = Chain::new(shared.clone());
    let mut rival = Chain::new(shared);

    // Five shared blocks, then the chains diverge at height 5.
    for _ in 0..5 {
        let block = mine_on(&mut chain, tag_from_str("miner"), vec![]);
        rival.accept_block(block).unwrap();
    }
    let ours = mine_on(&mut chain, tag_from_str("miner"), vec![]);
    let theirs = mine_on(&mut rival, tag_from_str("rival"), vec![]);
    assert_ne!(ours.hash(), theirs.hash());

    assert_eq!(chain.accept_block(theirs.clone()).unwrap(), BlockOutcome::Stale);
    assert_eq!(chain.merge_branch(vec![theirs]).unwrap(), BlockOutcome::Stale);
    assert_eq!(chain.tip_hash(), ours.hash());
    assert_eq!(
        chain.ledger().balance(&tag_from_str("miner")),
        Numeral::from_u64(600)
    );
}

#[test]
fn longer_rival_branch_reorganizes_and_refunds_the_mempool() {
    let shared = params(50);
    let mut chain = Chain::new(shared.clone());
    let mut rival = Chain::new(shared);
    let mut pool = Mempool::new();

    let genesis = mine_on(&mut chain, tag_from_str("alice"), vec![]);
    rival.accept_block(genesis).unwrap();

    // Our tip records Alice's payment; the rival branch does not.
    let payment = transfer("alice", "bob", 20);
    let local_tip = mine_on(&mut chain, tag_from_str("miner"), vec![payment]);
    pool.purge(&local_tip, chain.ledger());

    let r1 = mine_on(&mut rival, tag_from_str("rival"), vec![]);
    let r2 = mine_on(&mut rival, tag_from_str("rival"), vec![]);

    let reverted = match chain.merge_branch(vec![r1, r2.clone()]).unwrap() {
        BlockOutcome::Reorganized { reverted } => reverted,
        other => panic!("expected Reorganized, got {other:?}"),
    };
    assert_eq!(reverted.len(), 1);
    assert_eq!(chain.tip_hash(), r2.hash());

    // The reverted payment flows back to the pool and is still funded.
    pool.reinstate(&reverted, &chain);
    pool.revalidate(&chain);
    assert_eq!(pool.len(), 1);
    assert!(pool.contains(&payment.hash()));
    assert_eq!(
        chain.ledger().balance(&tag_from_str("alice")),
        Numeral::from_u64(50)
    );
    assert_eq!(chain.ledger().balance(&tag_from_str("bob")), Numeral::zero());
}

#[test]
fn deep_fork_is_adopted_after_a_genesis_restart() {
    let shared = params(100);
    let mut local = Chain::new(shared.clone());
    let mut peer = Chain::new(shared);

    // Shared genesis, then the chains diverge: local holds heights 0..=1,
    // the peer builds three rival blocks on the same genesis.
    let genesis = mine_on(&mut local, tag_from_str("miner"), vec![]);
    peer.accept_block(genesis).unwrap();
    let local_tip = mine_on(&mut local, tag_from_str("miner"), vec![]);
    for _ in 0..3 {
        mine_on(&mut peer, tag_from_str("rival"), vec![]);
    }
    assert_ne!(local.hash_at(&Numeral::one()), peer.hash_at(&Numeral::one()));

    // The peer's tip does not attach to ours; only its height is known.
    let target = match local.accept_block(peer.tip().unwrap().clone()).unwrap() {
        BlockOutcome::NeedsSync { target_height } => target_height,
        other => panic!("expected NeedsSync, got {other:?}"),
    };
    assert_eq!(target, Numeral::from_u64(3));

    // The first negotiation fetches only heights 2..=3, which anchor to a
    // parent we do not hold; the genesis restart walks the shared prefix
    // and comes back with a branch forking at height 1.
    let reverted = match sync_with(&mut local, &peer, target) {
        BlockOutcome::Reorganized { reverted } => reverted,
        other => panic!("expected Reorganized, got {other:?}"),
    };
    assert_eq!(reverted.len(), 1);
    assert_eq!(reverted[0].hash(), local_tip.hash());
    assert_eq!(local.len(), 4);
    assert_eq!(local.tip_hash(), peer.tip_hash());
    assert_eq!(local.ledger(), peer.ledger());
}

#[test]
fn miner_recovers_from_a_collectively_overspending_pool() {
    let mut chain = Chain::new(params(100));
    let mut pool = Mempool::new();
    mine_on(&mut chain, tag_from_str("alice"), vec![]);

    // Admission covers each transfer alone; together they overdraw Alice.
    let first = transfer("alice", "bob", 60);
    let second = transfer("alice", "carol", 60);
    pool.submit(first, &chain).unwrap();
    pool.submit(second, &chain).unwrap();

    // The next mining round selects only what the running balance covers,
    // so its block is accepted instead of bouncing forever.
    let batch = pool.select_batch(chain.params().txs_per_block, chain.ledger());
    assert_eq!(batch, vec![first]);
    let block = mine_on(&mut chain, tag_from_str("miner"), batch);
    pool.purge(&block, chain.ledger());

    // The skipped transfer is no longer funded and is evicted by the purge.
    assert!(pool.is_empty());
    assert_eq!(
        chain.ledger().balance(&tag_from_str("bob")),
        Numeral::from_u64(60)
    );
    assert_eq!(
        chain.ledger().balance(&tag_from_str("alice")),
        Numeral::from_u64(40)
    );
}

#[test]
fn synchronizer_walks_a_node_from_height_97_to_100() {
    let shared = params(100);
    let mut peer = Chain::new(shared.clone());
    let mut local = Chain::new(shared);

    // The peer holds heights 0..=100; the local node stops at 97.
    for i in 0..101u64 {
        let block = mine_on(&mut peer, tag_from_str("miner"), vec![]);
        if i < 98 {
            local.accept_block(block).unwrap();
        }
    }
    assert_eq!(local.len(), 98);
    assert_eq!(peer.len(), 101);

    // The peer's tip announcement does not attach to our tip.
    let tip = peer.tip().unwrap().clone();
    let target = match local.accept_block(tip).unwrap() {
        BlockOutcome::NeedsSync { target_height } => target_height,
        other => panic!("expected NeedsSync, got {other:?}"),
    };
    assert_eq!(target, Numeral::from_u64(100));

    // Drive the machine with the peer chain standing in for the remote end.
    assert_eq!(sync_with(&mut local, &peer, target), BlockOutcome::Extended);
    assert_eq!(local.len(), 101);
    assert_eq!(local.tip_hash(), peer.tip_hash());
    assert_eq!(local.ledger(), peer.ledger());
}
