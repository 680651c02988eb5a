// Blockchain orchestrator.
//
// Owns every stateful component behind its own lock and sequences block
// ingress:
//
//   structure -> parents -> temporal -> height -> difficulty ->
//   eligibility -> PoUW -> shielded pre-checks -> DAG insert ->
//   main-chain delta commit -> reputation/epoch -> tasks -> difficulty
//   window -> mempool hooks
//
// Locks are taken strictly one component at a time and never held
// across a call into another component; the canonical order is
// Mempool < BlockDag < NullifierSet < CommitmentTree < ReputationEngine,
// with the storage lock innermost within a component operation. Block
// insertions are serialized by the ingress mutex: either order of two
// concurrent insertions is admissible, so one at a time is too.
//
// Shielded state is never mutated during validation. Nullifier marks
// and commitment appends happen only for blocks entering the main
// chain, and a reorg unwinds exactly the off-chain delta.

use crate::{
    core::{
        blockdag::{BlockDag, InsertOutcome},
        difficulty::DifficultyController,
        error::BlockchainError,
        mempool::Mempool,
        mining::MinedWork,
        pouw::{PoUWValidator, ProofVerifier},
        reputation::ReputationEngine,
        shielded::{CommitmentTree, NullifierSet},
        storage::{BlockProvider, NullifierProvider, Storage, TaskProvider},
        tasks::TaskScheduler,
        validator::{BlockValidator, OrphanPool},
    },
    vrf::VrfSource,
};
use gradia_common::{
    block::{calculate_merkle_root, Block, BlockHeader},
    config::{ChainParams, MAX_BLOCK_SIZE, MAX_BLOCK_TXS},
    crypto::{Address, Hash},
    difficulty::check_difficulty,
    score::SCALE,
    time::get_current_time_in_seconds,
    transaction::Transaction,
};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

/// Outcome of submitting a block
#[derive(Debug, PartialEq, Eq)]
pub enum BlockStatus {
    /// In the DAG; `reorged` when the main chain flipped branches
    Accepted { hash: Hash, reorged: bool },
    /// Parents unknown, suspended for retry
    Suspended { hash: Hash },
}

pub struct Blockchain<S: Storage, V: ProofVerifier, R: VrfSource> {
    params: Arc<ChainParams>,
    storage: Arc<RwLock<S>>,
    mempool: RwLock<Mempool>,
    dag: RwLock<BlockDag>,
    nullifiers: RwLock<NullifierSet>,
    tree: RwLock<CommitmentTree>,
    reputation: RwLock<ReputationEngine>,
    pouw: RwLock<PoUWValidator<V, R>>,
    scheduler: Arc<RwLock<TaskScheduler>>,
    validator: BlockValidator,
    orphans: Mutex<OrphanPool>,
    difficulty: DifficultyController,
    // Serializes block ingress end to end
    ingress: Mutex<()>,
    height_watch: watch::Sender<u64>,
}

impl<S: Storage, V: ProofVerifier, R: VrfSource> Blockchain<S, V, R> {
    pub async fn new(
        params: Arc<ChainParams>,
        storage: S,
        verifier: Arc<V>,
        vrf: Arc<R>,
    ) -> Result<Self, BlockchainError> {
        let tree = CommitmentTree::load(&storage, params.recent_anchors_window).await?;
        let dag = BlockDag::load(&storage).await?;
        let initial_difficulty = params.minimum_difficulty;
        let (height_watch, _) = watch::channel(dag.height());

        Ok(Self {
            mempool: RwLock::new(Mempool::new(params.clone())),
            dag: RwLock::new(dag),
            nullifiers: RwLock::new(NullifierSet::default()),
            tree: RwLock::new(tree),
            reputation: RwLock::new(ReputationEngine::new(params.clone())),
            pouw: RwLock::new(PoUWValidator::new(params.clone(), verifier, vrf)),
            scheduler: Arc::new(RwLock::new(TaskScheduler::new(params.clone()))),
            validator: BlockValidator::new(params.clone()),
            orphans: Mutex::new(OrphanPool::new()),
            difficulty: DifficultyController::new(params.clone(), initial_difficulty),
            ingress: Mutex::new(()),
            height_watch,
            storage: Arc::new(RwLock::new(storage)),
            params,
        })
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn storage(&self) -> Arc<RwLock<S>> {
        self.storage.clone()
    }

    pub fn scheduler(&self) -> Arc<RwLock<TaskScheduler>> {
        self.scheduler.clone()
    }

    pub fn difficulty_controller(&self) -> &DifficultyController {
        &self.difficulty
    }

    /// Current main-chain height
    pub async fn height(&self) -> u64 {
        self.dag.read().await.height()
    }

    pub async fn main_tip(&self) -> Option<Hash> {
        self.dag.read().await.main_tip().cloned()
    }

    /// Watch main-chain height changes
    pub fn height_stream(&self) -> watch::Receiver<u64> {
        self.height_watch.subscribe()
    }

    pub async fn current_commitment_root(&self) -> Hash {
        self.tree.read().await.root().clone()
    }

    pub async fn mempool_size(&self) -> usize {
        self.mempool.read().await.len()
    }

    /// Ingest a block. Orphans are suspended and retried when their
    /// parents arrive; every other failure aborts with no state change.
    pub async fn add_block(
        &self,
        block: Arc<Block>,
        token: &CancellationToken,
    ) -> Result<BlockStatus, BlockchainError> {
        let _guard = self.ingress.lock().await;
        let status = self.add_block_locked(block, token).await?;

        // Retry anything that was waiting on the accepted block,
        // cascading until no suspended block becomes insertable
        if let BlockStatus::Accepted { hash, .. } = &status {
            let mut ready = self.orphans.lock().await.on_block_added(hash);
            while let Some(suspended) = ready.pop() {
                let suspended_hash = suspended.hash();
                match self.add_block_locked(suspended, token).await {
                    Ok(BlockStatus::Accepted { hash, .. }) => {
                        debug!("orphan {} unblocked", hash);
                        ready.extend(self.orphans.lock().await.on_block_added(&hash));
                    }
                    Ok(BlockStatus::Suspended { .. }) => {}
                    Err(e) => warn!("suspended block {} rejected on retry: {}", suspended_hash, e),
                }
            }
        }

        Ok(status)
    }

    async fn add_block_locked(
        &self,
        block: Arc<Block>,
        token: &CancellationToken,
    ) -> Result<BlockStatus, BlockchainError> {
        let hash = block.hash();
        let header = block.get_header().clone();

        self.validator.check_structure(&block)?;

        if !header.is_genesis() {
            // Parent lookups; a missing parent suspends the block
            let mut parent_heights = Vec::with_capacity(header.get_parents().len());
            let mut parent_timestamps = Vec::with_capacity(header.get_parents().len());
            {
                let storage = self.storage.read().await;
                for parent in header.get_parents() {
                    if !storage.has_block(parent).await? {
                        drop(storage);
                        self.orphans.lock().await.suspend(block, parent.clone());
                        return Ok(BlockStatus::Suspended { hash });
                    }
                    let parent_block = storage.get_block_by_hash(parent).await?;
                    parent_heights.push(parent_block.get_header().height);
                    parent_timestamps.push(parent_block.get_header().timestamp);
                }
            }

            self.validator
                .check_temporal(&header, &parent_timestamps, get_current_time_in_seconds())?;
            self.validator.check_height(&header, &parent_heights)?;
            self.validator.check_difficulty(&header)?;

            // Reputation engine: bans, forced exits, minimum stake
            {
                let reputation = self.reputation.read().await;
                let storage = self.storage.read().await;
                reputation
                    .check_eligibility(&*storage, &header.miner, header.height)
                    .await?;
            }

            self.validate_pouw(&block, &header, token).await?;
            self.validate_shielded(&block, token).await?;
        }

        // DAG insertion computes the cumulative score and re-evaluates
        // the main chain
        let outcome = {
            let mut dag = self.dag.write().await;
            let mut storage = self.storage.write().await;
            dag.insert_block(&mut *storage, block.clone(), token).await?
        };

        // Commit the main-chain delta: shielded state, mempool,
        // difficulty window
        self.apply_chain_delta(&outcome, token).await?;

        // Reputation and epochs
        {
            let mut reputation = self.reputation.write().await;
            let mut storage = self.storage.write().await;
            reputation
                .record_block(&mut *storage, &header.miner, header.quality, header.height)
                .await?;
            let epoch = self.params.epoch_at_height(header.height);
            if epoch > reputation.current_epoch() {
                reputation
                    .advance_to_epoch(&mut *storage, epoch, header.height)
                    .await?;
            }
        }
        if let Some(claim) = block.get_pouw_claim() {
            self.pouw
                .write()
                .await
                .record_gradient(&header.miner, claim.gradient_hash.clone());
        }

        // The task this block's work was for is done
        if !header.is_genesis() {
            let scheduler = self.scheduler.read().await;
            let mut storage = self.storage.write().await;
            scheduler.complete(&mut *storage, &header.task_id).await?;
        }

        // Height tick: watchers and task lease reclamation
        let height = self.dag.read().await.height();
        self.height_watch.send_replace(height);
        {
            let mut scheduler = self.scheduler.write().await;
            let mut storage = self.storage.write().await;
            scheduler.on_new_height(&mut *storage, height).await?;
        }

        info!(
            "block {} accepted at height {}{}",
            hash,
            header.height,
            if outcome.is_reorg() { " (reorg)" } else { "" }
        );
        Ok(BlockStatus::Accepted {
            hash,
            reorged: outcome.is_reorg(),
        })
    }

    async fn validate_pouw(
        &self,
        block: &Block,
        header: &BlockHeader,
        token: &CancellationToken,
    ) -> Result<(), BlockchainError> {
        let task = {
            let storage = self.storage.read().await;
            storage
                .get_task(&header.task_id)
                .await?
                .ok_or_else(|| BlockchainError::NotFound(header.task_id.clone()))?
        };

        let result = {
            let pouw = self.pouw.read().await;
            pouw.validate(header, block.get_pouw_claim(), &task, token)
        };

        if let Err(BlockchainError::PoUWInvalid(reason)) = &result {
            // The submitted work did not validate: the task stays failed
            warn!("task {} failed PoUW validation: {}", header.task_id, reason);
            let scheduler = self.scheduler.read().await;
            let mut storage = self.storage.write().await;
            scheduler.fail(&mut *storage, &header.task_id).await?;
        }
        result
    }

    // Anchor freshness, spent nullifiers and transaction proofs.
    // Read-only: nothing is staged into the shielded state here.
    async fn validate_shielded(
        &self,
        block: &Block,
        token: &CancellationToken,
    ) -> Result<(), BlockchainError> {
        {
            let tree = self.tree.read().await;
            for tx in block.get_transactions() {
                if !tree.is_recent_root(&tx.anchor) {
                    return Err(BlockchainError::AnchorUnknown(tx.anchor.clone()));
                }
            }
        }

        {
            let nullifiers = self.nullifiers.read().await;
            let storage = self.storage.read().await;
            for tx in block.get_transactions() {
                if token.is_cancelled() {
                    return Err(BlockchainError::Cancelled);
                }
                for nullifier in &tx.nullifiers {
                    if nullifiers.is_spent(&*storage, nullifier).await? {
                        return Err(BlockchainError::NullifierSpent(nullifier.clone()));
                    }
                }
            }
        }

        {
            let pouw = self.pouw.read().await;
            for tx in block.get_transactions() {
                if token.is_cancelled() {
                    return Err(BlockchainError::Cancelled);
                }
                if !pouw
                    .verifier()
                    .verify_transaction(&tx.proof, &tx.public_inputs())
                {
                    return Err(BlockchainError::StructurallyInvalid(
                        "transaction proof rejected",
                    ));
                }
            }
        }

        Ok(())
    }

    // Apply a main-chain membership delta. Off-chain spends are freed
    // first, then every newly on-chain block commits its nullifiers and
    // commitments and feeds the mempool/difficulty hooks. Off-chain
    // transactions return to the mempool when still valid.
    async fn apply_chain_delta(
        &self,
        outcome: &InsertOutcome,
        token: &CancellationToken,
    ) -> Result<(), BlockchainError> {
        // 1. Unwind the branch that lost
        let mut off_chain_txs: Vec<Arc<Transaction>> = Vec::new();
        if !outcome.off_chain.is_empty() {
            {
                let storage = self.storage.read().await;
                for hash in &outcome.off_chain {
                    let block = storage.get_block_by_hash(hash).await?;
                    off_chain_txs.extend(block.get_transactions().iter().cloned());
                }
            }

            let mut nullifiers = self.nullifiers.write().await;
            let mut storage = self.storage.write().await;
            for tx in &off_chain_txs {
                let tx_hash = tx.hash();
                for nullifier in &tx.nullifiers {
                    // Only free entries this very transaction recorded
                    let owned = storage
                        .get_nullifier_info(nullifier)
                        .await?
                        .map(|info| info.tx_hash == tx_hash)
                        .unwrap_or(false);
                    if owned {
                        nullifiers.unmark(&mut *storage, nullifier).await?;
                    }
                }
            }
        }

        // 2. Commit the branch that won, oldest block first
        for hash in &outcome.on_chain {
            if token.is_cancelled() {
                return Err(BlockchainError::Cancelled);
            }

            let block = {
                let storage = self.storage.read().await;
                storage.get_block_by_hash(hash).await?
            };
            let height = block.get_header().height;

            // Spent nullifiers, one transaction at a time: a conflicting
            // spend from a merged branch loses to history and is skipped
            {
                let mut nullifiers = self.nullifiers.write().await;
                let mut storage = self.storage.write().await;
                for tx in block.get_transactions() {
                    let tx_hash = tx.hash();
                    let spends: Vec<(Hash, Hash)> = tx
                        .nullifiers
                        .iter()
                        .map(|n| (n.clone(), tx_hash.clone()))
                        .collect();
                    match nullifiers
                        .mark_all_spent(&mut *storage, &spends, height)
                        .await
                    {
                        Ok(()) => {}
                        Err(BlockchainError::NullifierSpent(n)) => {
                            warn!(
                                "spend {} in block {} lost a nullifier conflict on {}",
                                tx_hash, hash, n
                            );
                        }
                        Err(e) => return Err(e),
                    }
                }
            }

            // Output commitments enter the tree as one batch per block
            {
                let commitments: Vec<Hash> = block
                    .get_transactions()
                    .iter()
                    .flat_map(|tx| tx.commitments.iter().cloned())
                    .collect();
                let mut tree = self.tree.write().await;
                let mut storage = self.storage.write().await;
                tree.append_batch(&mut *storage, &commitments).await?;
            }

            // Confirmation hook
            {
                let mut mempool = self.mempool.write().await;
                mempool.on_block_confirmed(block.get_transactions());
            }

            self.difficulty
                .record_block(block.get_header().timestamp, height);
        }

        if !outcome.on_chain.is_empty() {
            self.difficulty.adjust();
        }

        // 3. Give displaced transactions a second chance
        if !off_chain_txs.is_empty() {
            self.reinject_transactions(off_chain_txs).await;
        }

        Ok(())
    }

    // A displaced transaction returns to the pool only when its anchor
    // is still in the recent-root window and none of its nullifiers got
    // spent by the winning branch
    async fn reinject_transactions(&self, txs: Vec<Arc<Transaction>>) {
        let mut candidates = Vec::with_capacity(txs.len());
        {
            let tree = self.tree.read().await;
            for tx in txs {
                if tree.is_recent_root(&tx.anchor) {
                    candidates.push(tx);
                }
            }
        }

        let mut free = Vec::with_capacity(candidates.len());
        {
            let nullifiers = self.nullifiers.read().await;
            let storage = self.storage.read().await;
            'tx: for tx in candidates {
                for nullifier in &tx.nullifiers {
                    match nullifiers.is_spent(&*storage, nullifier).await {
                        Ok(false) => {}
                        _ => continue 'tx,
                    }
                }
                free.push(tx);
            }
        }

        let mut mempool = self.mempool.write().await;
        for tx in free {
            let hash = tx.hash();
            match mempool.insert(tx) {
                Ok(()) => debug!("reinjected {} after reorg", hash),
                Err(e) => debug!("dropping displaced {}: {}", hash, e),
            }
        }
    }

    /// Admit a transaction into the mempool: anchor freshness and the
    /// authoritative nullifier set first, proof next, fee-rate
    /// admission last.
    pub async fn submit_transaction(&self, tx: Arc<Transaction>) -> Result<(), BlockchainError> {
        if !tx.has_valid_nullifiers() {
            return Err(BlockchainError::StructurallyInvalid(
                "empty or duplicated nullifiers",
            ));
        }

        {
            let tree = self.tree.read().await;
            if !tree.is_recent_root(&tx.anchor) {
                return Err(BlockchainError::AnchorUnknown(tx.anchor.clone()));
            }
        }
        {
            let nullifiers = self.nullifiers.read().await;
            let storage = self.storage.read().await;
            for nullifier in &tx.nullifiers {
                if nullifiers.is_spent(&*storage, nullifier).await? {
                    return Err(BlockchainError::NullifierSpent(nullifier.clone()));
                }
            }
        }
        {
            let pouw = self.pouw.read().await;
            if !pouw
                .verifier()
                .verify_transaction(&tx.proof, &tx.public_inputs())
            {
                return Err(BlockchainError::StructurallyInvalid(
                    "transaction proof rejected",
                ));
            }
        }

        self.mempool.write().await.insert(tx)
    }

    /// Assemble a block template over the current tips for a finished
    /// unit of useful work. The caller seals it with `seal_block`.
    pub async fn create_block_template(
        &self,
        miner: Address,
        work: &MinedWork,
        token: &CancellationToken,
    ) -> Result<Block, BlockchainError> {
        let transactions = {
            let mempool = self.mempool.read().await;
            mempool.select(MAX_BLOCK_TXS, MAX_BLOCK_SIZE, token)?
        };

        let (parents, height, min_timestamp) = {
            let dag = self.dag.read().await;
            let storage = self.storage.read().await;
            let parents = dag.select_parents(&*storage).await?;
            let mut height = 0;
            let mut min_timestamp = 0;
            for parent in &parents {
                let parent_block = storage.get_block_by_hash(parent).await?;
                height = height.max(parent_block.get_header().height + 1);
                min_timestamp = min_timestamp.max(parent_block.get_header().timestamp);
            }
            (parents, height, min_timestamp)
        };

        let reputation = {
            let engine = self.reputation.read().await;
            let storage = self.storage.read().await;
            engine.get_score(&*storage, &miner).await?
        };

        let state_root = self.current_commitment_root().await;
        let timestamp = get_current_time_in_seconds().max(min_timestamp);

        Ok(Block::new(
            BlockHeader::new(
                parents,
                calculate_merkle_root(&transactions),
                state_root,
                work.claim.hash(),
                work.proof.clone(),
                work.task.id.clone(),
                work.claim.quality,
                miner,
                reputation,
                self.difficulty.current(),
                timestamp,
                height,
            ),
            Some(work.claim.clone()),
            transactions,
        ))
    }

    /// Current reputation score of a miner
    pub async fn reputation_of(&self, miner: &Address) -> Result<u64, BlockchainError> {
        let engine = self.reputation.read().await;
        let storage = self.storage.read().await;
        engine.get_score(&*storage, miner).await
    }

    /// Bond stake for a miner at the current height
    pub async fn deposit_stake(
        &self,
        miner: &Address,
        amount: u64,
    ) -> Result<(), BlockchainError> {
        let height = self.height().await;
        let mut engine = self.reputation.write().await;
        let mut storage = self.storage.write().await;
        engine.deposit_stake(&mut *storage, miner, amount, height).await
    }

    /// Apply an explicit reputation penalty
    pub async fn penalize(
        &self,
        miner: &Address,
        penalty: gradia_common::reputation::Penalty,
    ) -> Result<u64, BlockchainError> {
        let mut engine = self.reputation.write().await;
        let mut storage = self.storage.write().await;
        engine.apply_penalty(&mut *storage, miner, penalty).await
    }

    /// Submit slashing evidence for an offense, idempotent per evidence
    /// hash. Returns the consumed stake.
    pub async fn report_offense(
        &self,
        miner: &Address,
        offense: gradia_common::reputation::Offense,
        evidence: Hash,
    ) -> Result<u64, BlockchainError> {
        let mut engine = self.reputation.write().await;
        let mut storage = self.storage.write().await;
        engine.slash(&mut *storage, miner, offense, evidence).await
    }

    /// The verification-subset indices a miner must re-execute for a
    /// given seed and iteration
    pub async fn verification_subset(
        &self,
        prior_vrf_seed: &Hash,
        iteration: u64,
        batch_size: u64,
    ) -> Vec<u64> {
        self.pouw
            .read()
            .await
            .select_verification_subset(prior_vrf_seed, iteration, batch_size)
    }

    /// Bootstrap an empty chain with a genesis block
    pub async fn init_genesis(&self, miner: Address) -> Result<Hash, BlockchainError> {
        if let Some(tip) = self.main_tip().await {
            return Ok(tip);
        }

        let header = BlockHeader::new(
            indexmap::IndexSet::new(),
            Hash::zero(),
            self.current_commitment_root().await,
            Hash::zero(),
            Vec::new(),
            Hash::zero(),
            SCALE,
            miner,
            self.params.reputation_initial,
            self.params.minimum_difficulty,
            get_current_time_in_seconds(),
            0,
        );
        let genesis = Arc::new(Block::new(header, None, Vec::new()));
        let hash = genesis.hash();
        info!("creating genesis block {}", hash);
        self.add_block(genesis, &CancellationToken::new()).await?;
        Ok(hash)
    }
}

/// Grind the nonce until the header hash meets its difficulty target
pub fn seal_block(block: &mut Block) -> Hash {
    loop {
        let hash = block.hash();
        let met = check_difficulty(&hash, &block.get_header().difficulty).unwrap_or(false);
        if met {
            return hash;
        }
        let header = block.get_header_mut();
        header.nonce = header.nonce.wrapping_add(1);
    }
}
