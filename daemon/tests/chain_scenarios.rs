// End-to-end chain scenarios: genesis, shielded transfers, orphan
// retry, reorgs with nullifier release, anchor staleness, stake
// eligibility and epoch bans, all against the in-memory store.

use gradia_common::{
    block::{Block, BlockHeader},
    config::ChainParams,
    crypto::{hash, Address, Hash},
    pouw::{GradientClaim, Task, TaskStatus},
    reputation::{Offense, Penalty},
    time::get_current_time_in_seconds,
    transaction::Transaction,
};
use gradia_daemon::{
    core::{
        blockchain::{seal_block, BlockStatus, Blockchain},
        error::BlockchainError,
        mining::MinedWork,
        pouw::AcceptAllVerifier,
        storage::{MemoryStorage, TaskProvider},
    },
    vrf::Blake3Vrf,
};
use indexmap::IndexSet;
use primitive_types::U256;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

type Chain = Blockchain<MemoryStorage, AcceptAllVerifier, Blake3Vrf>;

fn test_params() -> ChainParams {
    ChainParams {
        // Sealable targets: one in sixteen hashes passes
        minimum_difficulty: U256::one() << 252,
        min_stake: 0,
        ..ChainParams::default()
    }
}

async fn new_chain(params: ChainParams) -> Chain {
    Blockchain::new(
        Arc::new(params),
        MemoryStorage::new(),
        Arc::new(AcceptAllVerifier),
        Arc::new(Blake3Vrf),
    )
    .await
    .unwrap()
}

fn miner(seed: u8) -> Address {
    Address::from_public_key(&[seed; 32])
}

fn task(seed: u64) -> Task {
    Task {
        id: hash(&seed.to_be_bytes()),
        model_id: hash(b"resnet checkpoint"),
        dataset_id: hash(b"dataset shard"),
        batch_start: 0,
        batch_end: 500,
        weights_id: hash(b"weights v1"),
        learning_rate: 10,
        difficulty: U256::MAX,
        reward: 1_000,
        status: TaskStatus::Pending,
    }
}

async fn publish_task(chain: &Chain, seed: u64) -> Task {
    let task = task(seed);
    let scheduler = chain.scheduler();
    let storage = chain.storage();
    let scheduler = scheduler.read().await;
    let mut storage = storage.write().await;
    scheduler.publish(&mut *storage, task.clone()).await.unwrap();
    task
}

async fn mined_work(chain: &Chain, task: &Task, salt: u64) -> MinedWork {
    let prior_vrf_seed = Hash::zero();
    let iteration = salt;
    let verified_indices = chain
        .verification_subset(&prior_vrf_seed, iteration, task.batch_size())
        .await;
    MinedWork {
        task: task.clone(),
        claim: GradientClaim {
            weights_before: task.weights_id.clone(),
            weights_after: hash(&[b"updated".as_slice(), salt.to_be_bytes().as_slice()].concat()),
            gradient_hash: hash(&[b"gradient".as_slice(), salt.to_be_bytes().as_slice()].concat()),
            batch_commitment: hash(b"batch"),
            loss_before: 500_000,
            loss_after: 450_000,
            quality: 1_000,
            prior_vrf_seed,
            iteration,
            verified_indices,
        },
        proof: vec![0xAB; 32],
    }
}

/// The full mining flow: publish a task, lease it, build a template
/// over the current tips, seal and submit
async fn mine_next(chain: &Chain, miner: Address, salt: u64) -> Result<Hash, BlockchainError> {
    let token = CancellationToken::new();
    let task = publish_task(chain, salt).await;
    {
        let scheduler = chain.scheduler();
        let storage = chain.storage();
        let scheduler = scheduler.read().await;
        let mut storage = storage.write().await;
        let leased = scheduler.try_assign(&mut *storage, &miner).await?;
        assert_eq!(leased.map(|t| t.id), Some(task.id.clone()));
    }
    let work = mined_work(chain, &task, salt).await;
    let mut block = chain.create_block_template(miner, &work, &token).await?;
    let hash = seal_block(&mut block);
    match chain.add_block(Arc::new(block), &token).await? {
        BlockStatus::Accepted { .. } => Ok(hash),
        BlockStatus::Suspended { hash } => panic!("template block {} suspended", hash),
    }
}

fn shielded_tx(nullifier_seed: &[u8], anchor: Hash, fee: u64) -> Arc<Transaction> {
    Arc::new(Transaction::new(
        vec![hash(nullifier_seed)],
        vec![hash(&[nullifier_seed, b"-commitment".as_slice()].concat())],
        vec![0xCD; 64],
        anchor,
        fee,
    ))
}

#[tokio::test]
async fn test_chain_grows_and_tracks_reputation() {
    let chain = new_chain(test_params()).await;
    let m = miner(1);
    chain.init_genesis(m.clone()).await.unwrap();
    assert_eq!(chain.height().await, 0);

    for salt in 1..=3 {
        mine_next(&chain, m.clone(), salt).await.unwrap();
    }
    assert_eq!(chain.height().await, 3);

    // Three q = 0.1 blocks pulled the EWMA below the 1.0 seed
    let score = chain.reputation_of(&m).await.unwrap();
    assert!(score < 10_000);
    assert!(score >= 1_000);

    // Completed tasks never get re-assigned
    let storage = chain.storage();
    let storage = storage.read().await;
    let stored = storage.get_task(&task(1).id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_shielded_transfer_lifecycle() {
    let chain = new_chain(test_params()).await;
    let m = miner(2);
    chain.init_genesis(m.clone()).await.unwrap();

    let anchor = chain.current_commitment_root().await;
    let tx = shielded_tx(b"note-1", anchor.clone(), 100);
    chain.submit_transaction(tx.clone()).await.unwrap();
    assert_eq!(chain.mempool_size().await, 1);

    // Double spend into the pool is refused outright
    let double = shielded_tx(b"note-1", anchor, 500);
    let err = chain.submit_transaction(double.clone()).await.unwrap_err();
    assert!(matches!(err, BlockchainError::NullifierSpent(_)));

    // The mined block carries the transaction and confirms it
    let root_before = chain.current_commitment_root().await;
    mine_next(&chain, m, 10).await.unwrap();
    assert_eq!(chain.mempool_size().await, 0);
    assert_ne!(chain.current_commitment_root().await, root_before);

    // The nullifier is now spent on-chain: the note cannot come back
    let err = chain.submit_transaction(double).await.unwrap_err();
    assert!(matches!(err, BlockchainError::NullifierSpent(_)));
}

#[tokio::test]
async fn test_duplicate_block_rejected() {
    let chain = new_chain(test_params()).await;
    let m = miner(3);
    chain.init_genesis(m.clone()).await.unwrap();

    let token = CancellationToken::new();
    let task = publish_task(&chain, 1).await;
    let work = mined_work(&chain, &task, 1).await;
    let mut block = chain.create_block_template(m, &work, &token).await.unwrap();
    seal_block(&mut block);
    let block = Arc::new(block);

    chain.add_block(block.clone(), &token).await.unwrap();
    let err = chain.add_block(block, &token).await.unwrap_err();
    assert!(matches!(err, BlockchainError::Duplicate(_)));
}

#[tokio::test]
async fn test_orphan_suspension_and_cascade() {
    let chain = new_chain(test_params()).await;
    let m = miner(4);
    chain.init_genesis(m.clone()).await.unwrap();
    mine_next(&chain, m.clone(), 1).await.unwrap();

    let token = CancellationToken::new();

    // Build B2 on the current tip without submitting it
    let task2 = publish_task(&chain, 2).await;
    let work2 = mined_work(&chain, &task2, 2).await;
    let mut b2 = chain
        .create_block_template(m.clone(), &work2, &token)
        .await
        .unwrap();
    seal_block(&mut b2);
    let b2 = Arc::new(b2);

    // Hand-build B3 on top of the unsubmitted B2
    let task3 = publish_task(&chain, 3).await;
    let work3 = mined_work(&chain, &task3, 3).await;
    let reputation = chain.reputation_of(&m).await.unwrap();
    let mut b3 = Block::new(
        BlockHeader::new(
            IndexSet::from([b2.hash()]),
            Hash::zero(),
            chain.current_commitment_root().await,
            work3.claim.hash(),
            work3.proof.clone(),
            work3.task.id.clone(),
            work3.claim.quality,
            m.clone(),
            reputation,
            chain.difficulty_controller().current(),
            get_current_time_in_seconds(),
            b2.get_header().height + 1,
        ),
        Some(work3.claim.clone()),
        vec![],
    );
    seal_block(&mut b3);
    let b3 = Arc::new(b3);

    // B3 first: unknown parent, suspended
    let status = chain.add_block(b3.clone(), &token).await.unwrap();
    assert_eq!(
        status,
        BlockStatus::Suspended { hash: b3.hash() }
    );
    assert_eq!(chain.height().await, 1);

    // B2 arrives: the cascade pulls B3 in as well
    let status = chain.add_block(b2.clone(), &token).await.unwrap();
    assert!(matches!(status, BlockStatus::Accepted { .. }));
    assert_eq!(chain.height().await, 3);
    assert_eq!(chain.main_tip().await, Some(b3.hash()));
}

#[tokio::test]
async fn test_reorg_releases_nullifiers_and_reinjects() {
    let chain = new_chain(test_params()).await;
    let m1 = miner(5);
    chain.init_genesis(m1.clone()).await.unwrap();
    let genesis = chain.main_tip().await.unwrap();
    let anchor = chain.current_commitment_root().await;

    // Branch one: block A carries a shielded spend, block B extends it
    let tx = shielded_tx(b"contested-note", anchor.clone(), 100);
    chain.submit_transaction(tx.clone()).await.unwrap();
    mine_next(&chain, m1.clone(), 1).await.unwrap();
    mine_next(&chain, m1.clone(), 2).await.unwrap();
    assert_eq!(chain.height().await, 2);
    assert_eq!(chain.mempool_size().await, 0);

    // The spend is on-chain: resubmitting the note fails
    let err = chain.submit_transaction(tx.clone()).await.unwrap_err();
    assert!(matches!(err, BlockchainError::NullifierSpent(_)));

    // Branch two: a single hand-built block straight off genesis whose
    // miner reputation carries three times the weighted work
    let token = CancellationToken::new();
    let m2 = miner(6);
    let task_c = publish_task(&chain, 99).await;
    let work_c = mined_work(&chain, &task_c, 99).await;
    let mut c = Block::new(
        BlockHeader::new(
            IndexSet::from([genesis.clone()]),
            Hash::zero(),
            anchor.clone(),
            work_c.claim.hash(),
            work_c.proof.clone(),
            work_c.task.id.clone(),
            work_c.claim.quality,
            m2.clone(),
            30_000,
            chain.difficulty_controller().current(),
            get_current_time_in_seconds(),
            1,
        ),
        Some(work_c.claim.clone()),
        vec![],
    );
    seal_block(&mut c);

    let status = chain.add_block(Arc::new(c.clone()), &token).await.unwrap();
    assert!(matches!(
        status,
        BlockStatus::Accepted { reorged: true, .. }
    ));
    assert_eq!(chain.main_tip().await, Some(c.hash()));
    assert_eq!(chain.height().await, 1);

    // The losing branch's spend was freed and the transaction returned
    // to the pool: its anchor is still inside the recent-root window
    assert_eq!(chain.mempool_size().await, 1);
    let err = chain.submit_transaction(tx).await.unwrap_err();
    assert!(
        matches!(err, BlockchainError::Duplicate(_)),
        "the displaced transaction is already pooled again: {:?}",
        err
    );
}

#[tokio::test]
async fn test_anchor_goes_stale_after_window() {
    let chain = new_chain(test_params()).await;
    let m = miner(7);
    chain.init_genesis(m.clone()).await.unwrap();

    // A transaction anchored at the genesis root, held back
    let stale_anchor = chain.current_commitment_root().await;
    let held = shielded_tx(b"held-note", stale_anchor.clone(), 100);

    // 101 blocks, each appending one commitment batch, march the root
    // history past the window
    for salt in 0..101u64 {
        let anchor = chain.current_commitment_root().await;
        let fresh = shielded_tx(&salt.to_be_bytes(), anchor, 100);
        chain.submit_transaction(fresh).await.unwrap();
        mine_next(&chain, m.clone(), salt + 1).await.unwrap();
    }

    let err = chain.submit_transaction(held).await.unwrap_err();
    assert!(matches!(err, BlockchainError::AnchorUnknown(a) if a == stale_anchor));
}

#[tokio::test]
async fn test_minimum_stake_gates_mining() {
    let params = ChainParams {
        min_stake: 1_000_000,
        ..test_params()
    };
    let chain = new_chain(params).await;
    let m = miner(8);
    chain.init_genesis(m.clone()).await.unwrap();

    // No bond, no blocks
    let err = mine_next(&chain, m.clone(), 1).await.unwrap_err();
    assert!(matches!(err, BlockchainError::InsufficientStake { .. }));

    chain.deposit_stake(&m, 1_000_000).await.unwrap();
    mine_next(&chain, m.clone(), 2).await.unwrap();
    assert_eq!(chain.height().await, 1);

    // Two fraudulent-PoUW slashes force the exit, mining stops for good
    chain
        .report_offense(&m, Offense::FraudulentPoUW, hash(b"evidence-1"))
        .await
        .unwrap();
    chain
        .report_offense(&m, Offense::FraudulentPoUW, hash(b"evidence-2"))
        .await
        .unwrap();
    let err = mine_next(&chain, m, 3).await.unwrap_err();
    assert!(matches!(err, BlockchainError::InsufficientStake { .. }));
}

#[tokio::test]
async fn test_epoch_boundary_bans_low_scores() {
    let params = ChainParams {
        epoch_length: 5,
        ..test_params()
    };
    let chain = new_chain(params).await;
    let m = miner(9);
    chain.init_genesis(m.clone()).await.unwrap();

    for salt in 1..=4 {
        mine_next(&chain, m.clone(), salt).await.unwrap();
    }

    // Triple double-vote pushes the score to the clamp floor, well
    // under the ban threshold
    for _ in 0..3 {
        chain.penalize(&m, Penalty::DoubleVote).await.unwrap();
    }
    assert_eq!(chain.reputation_of(&m).await.unwrap(), 1_000);

    // Height 5 crosses the epoch boundary: the rollover bans the miner
    mine_next(&chain, m.clone(), 5).await.unwrap();
    assert_eq!(chain.height().await, 5);

    let err = mine_next(&chain, m, 6).await.unwrap_err();
    assert!(matches!(
        err,
        BlockchainError::MinerBanned { until } if until == 5 + 10_000
    ));
}
