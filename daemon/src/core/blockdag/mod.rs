// BlockDAG.
//
// Multi-parent block DAG with reputation-weighted cumulative scoring.
// A block's score is its own weighted work plus the best score among
// its parents: taking the max (not the sum) avoids double-counting the
// shared history below a merge, while still making every block score
// strictly above all of its ancestors.
//
// The main chain is the selected-parent path from the highest-scoring
// tip down to genesis. When an insertion produces a better tip, both
// paths are walked back to the common ancestor and the on-chain /
// off-chain deltas are committed atomically.

use crate::core::{
    error::BlockchainError,
    storage::{BlockProvider, Tips},
};
use gradia_common::{
    block::{Block, BlockHeader},
    crypto::Hash,
    difficulty::{mul_ratio, work_from_difficulty, CumulativeScore},
    score::SCALE,
};
use log::{debug, trace};
use primitive_types::U256;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Result of a block insertion. `on_chain` / `off_chain` are the
/// main-chain membership deltas, oldest block first; both are empty
/// when the block landed on a side branch.
#[derive(Debug)]
pub struct InsertOutcome {
    pub hash: Hash,
    pub score: CumulativeScore,
    pub on_chain: Vec<Hash>,
    pub off_chain: Vec<Hash>,
}

impl InsertOutcome {
    pub fn is_reorg(&self) -> bool {
        !self.off_chain.is_empty()
    }
}

// Sort (hash, score) pairs by descending cumulative score, ties broken
// by ascending hash order
pub fn sort_descending_by_cumulative_score<T>(scores: &mut Vec<(T, CumulativeScore)>)
where
    T: AsRef<Hash>,
{
    trace!("sort descending by cumulative score");
    scores.sort_by(|(a_hash, a), (b_hash, b)| {
        if a != b {
            b.cmp(a)
        } else {
            a_hash.as_ref().cmp(b_hash.as_ref())
        }
    });

    if scores.len() >= 2 {
        debug_assert!(scores[0].1 >= scores[1].1);
    }
}

#[derive(Default)]
pub struct BlockDag {
    tips: Tips,
    main_tip: Option<Hash>,
    main_tip_score: CumulativeScore,
    main_tip_height: u64,
}

impl BlockDag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the in-memory tip state from storage
    pub async fn load<P: BlockProvider>(provider: &P) -> Result<Self, BlockchainError> {
        let mut dag = Self::new();
        dag.tips = provider.get_tips().await?;

        let mut scores = Vec::with_capacity(dag.tips.len());
        for tip in dag.tips.iter() {
            let score = provider.get_cumulative_score(tip).await?;
            scores.push((tip.clone(), score));
        }
        sort_descending_by_cumulative_score(&mut scores);
        if let Some((best, score)) = scores.into_iter().next() {
            dag.main_tip_height = provider.get_block_by_hash(&best).await?.get_header().height;
            dag.main_tip = Some(best);
            dag.main_tip_score = score;
        }
        Ok(dag)
    }

    pub fn tips(&self) -> &Tips {
        &self.tips
    }

    pub fn main_tip(&self) -> Option<&Hash> {
        self.main_tip.as_ref()
    }

    pub fn main_tip_score(&self) -> CumulativeScore {
        self.main_tip_score
    }

    /// Height of the main-chain tip
    pub fn height(&self) -> u64 {
        self.main_tip_height
    }

    /// Cumulative score a block would earn:
    /// S(B) = Work(B) * Rep(miner) + max over parents of S(p).
    /// The weighted work never rounds to zero, so S is strictly
    /// increasing along every edge.
    pub async fn cumulative_score<P: BlockProvider>(
        &self,
        provider: &P,
        header: &BlockHeader,
    ) -> Result<CumulativeScore, BlockchainError> {
        let work = work_from_difficulty(&header.difficulty);
        let weighted = mul_ratio(work, header.reputation, SCALE).max(U256::one());

        let mut best_parent = CumulativeScore::zero();
        for parent in header.get_parents() {
            let score = provider.get_cumulative_score(parent).await?;
            if score > best_parent {
                best_parent = score;
            }
        }
        Ok(weighted.saturating_add(best_parent))
    }

    /// Parents for a new block: up to max_parents tips, best cumulative
    /// score first, ties by hash order
    pub async fn select_parents<P: BlockProvider>(
        &self,
        provider: &P,
    ) -> Result<Tips, BlockchainError> {
        let mut scores = Vec::with_capacity(self.tips.len());
        for tip in self.tips.iter() {
            let score = provider.get_cumulative_score(tip).await?;
            scores.push((tip.clone(), score));
        }
        sort_descending_by_cumulative_score(&mut scores);
        Ok(scores
            .into_iter()
            .take(gradia_common::config::MAX_PARENTS)
            .map(|(hash, _)| hash)
            .collect())
    }

    /// Insert a validated block.
    ///
    /// Fails with Duplicate when present and Orphan when a parent is
    /// missing (the caller queues the block for retry). Otherwise the
    /// block is persisted with its score, the tip set is updated, and
    /// the main chain is re-evaluated.
    pub async fn insert_block<P: BlockProvider>(
        &mut self,
        provider: &mut P,
        block: Arc<Block>,
        token: &CancellationToken,
    ) -> Result<InsertOutcome, BlockchainError> {
        let hash = block.hash();
        if provider.has_block(&hash).await? {
            return Err(BlockchainError::Duplicate(hash));
        }

        let header = block.get_header();
        for parent in header.get_parents() {
            if !provider.has_block(parent).await? {
                return Err(BlockchainError::Orphan {
                    block: hash,
                    parent: parent.clone(),
                });
            }
        }

        let score = self.cumulative_score(provider, header).await?;
        let height = header.height;
        let timestamp = header.timestamp;
        let parents: Vec<Hash> = header.get_parents().iter().cloned().collect();
        provider.save_block(block, score).await?;

        for parent in &parents {
            self.tips.shift_remove(parent);
        }
        self.tips.insert(hash.clone());
        provider.store_tips(&self.tips).await?;

        // Main-chain selection: strictly greater score wins
        let (on_chain, off_chain) = match self.main_tip.clone() {
            None => {
                provider
                    .mark_main_chain(std::slice::from_ref(&hash), &[])
                    .await?;
                (vec![hash.clone()], Vec::new())
            }
            Some(old_tip) if score > self.main_tip_score => {
                let (on, off) = self
                    .compute_chain_delta(provider, &hash, &old_tip, token)
                    .await?;
                provider.mark_main_chain(&on, &off).await?;
                if !off.is_empty() {
                    debug!(
                        "reorg at height {}: {} blocks on, {} blocks off",
                        height,
                        on.len(),
                        off.len()
                    );
                }
                (on, off)
            }
            Some(_) => (Vec::new(), Vec::new()),
        };

        if !on_chain.is_empty() {
            self.main_tip = Some(hash.clone());
            self.main_tip_score = score;
            self.main_tip_height = height;
        }

        trace!(
            "inserted block {} at height {} (timestamp {}, score {})",
            hash,
            height,
            timestamp,
            score
        );
        Ok(InsertOutcome {
            hash,
            score,
            on_chain,
            off_chain,
        })
    }

    // Walk both tips back along their selected parents to the lowest
    // common ancestor. Returns (on_chain, off_chain), oldest first.
    async fn compute_chain_delta<P: BlockProvider>(
        &self,
        provider: &P,
        new_tip: &Hash,
        old_tip: &Hash,
        token: &CancellationToken,
    ) -> Result<(Vec<Hash>, Vec<Hash>), BlockchainError> {
        let mut on_chain = Vec::new();
        let mut off_chain = Vec::new();

        let mut a = new_tip.clone();
        let mut b = old_tip.clone();
        let mut height_a = provider.get_block_by_hash(&a).await?.get_header().height;
        let mut height_b = provider.get_block_by_hash(&b).await?.get_header().height;

        while a != b {
            if token.is_cancelled() {
                return Err(BlockchainError::Cancelled);
            }

            if height_a >= height_b {
                on_chain.push(a.clone());
                let parent = self.selected_parent(provider, &a).await?.ok_or_else(|| {
                    BlockchainError::StorageFailure(format!(
                        "no common ancestor between {} and {}",
                        new_tip, old_tip
                    ))
                })?;
                height_a = provider.get_block_by_hash(&parent).await?.get_header().height;
                a = parent;
            } else {
                off_chain.push(b.clone());
                let parent = self.selected_parent(provider, &b).await?.ok_or_else(|| {
                    BlockchainError::StorageFailure(format!(
                        "no common ancestor between {} and {}",
                        new_tip, old_tip
                    ))
                })?;
                height_b = provider.get_block_by_hash(&parent).await?.get_header().height;
                b = parent;
            }
        }

        on_chain.reverse();
        off_chain.reverse();
        Ok((on_chain, off_chain))
    }

    /// The parent a block's main-chain path goes through: highest
    /// cumulative score, ties by hash order. None for genesis.
    pub async fn selected_parent<P: BlockProvider>(
        &self,
        provider: &P,
        hash: &Hash,
    ) -> Result<Option<Hash>, BlockchainError> {
        let block = provider.get_block_by_hash(hash).await?;
        let parents = block.get_header().get_parents();
        if parents.is_empty() {
            return Ok(None);
        }

        let mut scores = Vec::with_capacity(parents.len());
        for parent in parents {
            let score = provider.get_cumulative_score(parent).await?;
            scores.push((parent.clone(), score));
        }
        sort_descending_by_cumulative_score(&mut scores);
        Ok(scores.into_iter().next().map(|(hash, _)| hash))
    }
}
