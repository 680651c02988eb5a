// Block validation.
//
// Stateless structural, temporal and difficulty checks, applied before
// any component state is touched. Checks that need chain state (parent
// lookups, nullifier membership, anchors, PoUW) are sequenced by the
// blockchain orchestrator; this module supplies the pure rules and the
// orphan pool that suspends blocks with unknown parents.

use crate::core::error::BlockchainError;
use gradia_common::{
    block::{Block, BlockHeader},
    config::{ChainParams, BLOCK_VERSION, MAX_BLOCK_TXS, MAX_PARENTS},
    crypto::Hash,
    difficulty::check_difficulty,
    score::is_valid_quality,
    time::TimestampSeconds,
};
use indexmap::IndexSet;
use log::{debug, trace};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub struct BlockValidator {
    params: Arc<ChainParams>,
}

impl BlockValidator {
    pub fn new(params: Arc<ChainParams>) -> Self {
        Self { params }
    }

    /// Header and body well-formedness. First failure wins.
    pub fn check_structure(&self, block: &Block) -> Result<(), BlockchainError> {
        let header = block.get_header();

        if header.version != BLOCK_VERSION {
            return Err(BlockchainError::StructurallyInvalid(
                "unsupported block version",
            ));
        }
        if header.get_parents().len() > MAX_PARENTS {
            return Err(BlockchainError::StructurallyInvalid("too many parents"));
        }
        // Only genesis stands without parents
        if header.is_genesis() && header.height != 0 {
            return Err(BlockchainError::StructurallyInvalid(
                "non-genesis block without parents",
            ));
        }
        if block.get_transactions().len() > MAX_BLOCK_TXS {
            return Err(BlockchainError::StructurallyInvalid(
                "too many transactions",
            ));
        }
        if !block.is_self_consistent() {
            return Err(BlockchainError::StructurallyInvalid(
                "transaction root mismatch",
            ));
        }
        if !is_valid_quality(header.quality) {
            return Err(BlockchainError::StructurallyInvalid(
                "quality score out of bounds",
            ));
        }
        if header.reputation < self.params.reputation_min
            || header.reputation > self.params.reputation_max
        {
            return Err(BlockchainError::StructurallyInvalid(
                "reputation out of bounds",
            ));
        }

        // Per-transaction shape, and nullifier disjointness across the
        // whole block
        let mut block_nullifiers: HashSet<&Hash> = HashSet::new();
        for tx in block.get_transactions() {
            if !tx.has_valid_nullifiers() {
                return Err(BlockchainError::StructurallyInvalid(
                    "empty or duplicated nullifiers in transaction",
                ));
            }
            for nullifier in &tx.nullifiers {
                if !block_nullifiers.insert(nullifier) {
                    return Err(BlockchainError::DoubleSpendIntraBlock(nullifier.clone()));
                }
            }
        }

        trace!("block {} passed structural checks", block.hash());
        Ok(())
    }

    /// Timestamp window: at or after every parent, no further than the
    /// accepted clock skew into the future
    pub fn check_temporal(
        &self,
        header: &BlockHeader,
        parent_timestamps: &[TimestampSeconds],
        now: TimestampSeconds,
    ) -> Result<(), BlockchainError> {
        let min = parent_timestamps.iter().max().copied().unwrap_or(0);
        let max = now + self.params.max_clock_skew;
        if header.timestamp < min || header.timestamp > max {
            return Err(BlockchainError::TemporalInvalid {
                timestamp: header.timestamp,
                min,
                max,
            });
        }
        Ok(())
    }

    /// height = 1 + max(parent heights), 0 for genesis
    pub fn check_height(
        &self,
        header: &BlockHeader,
        parent_heights: &[u64],
    ) -> Result<(), BlockchainError> {
        let expected = parent_heights.iter().max().map(|h| h + 1).unwrap_or(0);
        if header.height != expected {
            return Err(BlockchainError::StructurallyInvalid(
                "height inconsistent with parents",
            ));
        }
        Ok(())
    }

    /// The header hash, big-endian, must be strictly under the target,
    /// and the target itself inside the global bounds
    pub fn check_difficulty(&self, header: &BlockHeader) -> Result<(), BlockchainError> {
        if header.difficulty < self.params.minimum_difficulty
            || header.difficulty > self.params.maximum_difficulty
        {
            return Err(BlockchainError::StructurallyInvalid(
                "difficulty target out of bounds",
            ));
        }
        let met = check_difficulty(&header.hash(), &header.difficulty)
            .map_err(|_| BlockchainError::StructurallyInvalid("zero difficulty target"))?;
        if !met {
            return Err(BlockchainError::DifficultyUnmet);
        }
        Ok(())
    }
}

/// Blocks whose parents have not arrived yet. An orphan is not an
/// error: it waits here and is retried whenever one of its missing
/// parents is added to the DAG.
#[derive(Default)]
pub struct OrphanPool {
    blocks: HashMap<Hash, Arc<Block>>,
    // missing parent -> blocks waiting on it
    waiting_on: HashMap<Hash, IndexSet<Hash>>,
}

impl OrphanPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.blocks.contains_key(hash)
    }

    /// Suspend a block until `missing_parent` shows up
    pub fn suspend(&mut self, block: Arc<Block>, missing_parent: Hash) {
        let hash = block.hash();
        debug!("suspending {} until parent {} arrives", hash, missing_parent);
        self.waiting_on
            .entry(missing_parent)
            .or_default()
            .insert(hash.clone());
        self.blocks.insert(hash, block);
    }

    /// A block was added to the DAG: release everything that was
    /// waiting on it, for re-validation
    pub fn on_block_added(&mut self, parent: &Hash) -> Vec<Arc<Block>> {
        let Some(waiting) = self.waiting_on.remove(parent) else {
            return Vec::new();
        };
        waiting
            .into_iter()
            .filter_map(|hash| self.blocks.remove(&hash))
            .collect()
    }
}
