// In-memory storage backend.
//
// The persistent backends (RocksDB and friends) live outside this
// crate; this implementation is authoritative for tests and
// single-process runs. Every map mutation is atomic under the caller's
// storage lock.

use super::{
    providers::{
        BlockProvider, CommitmentTreeProvider, NullifierInfo, NullifierProvider,
        ReputationProvider, TaskProvider,
    },
    Tips,
};
use crate::core::error::BlockchainError;
use async_trait::async_trait;
use gradia_common::{
    block::Block,
    crypto::{Address, Hash},
    difficulty::CumulativeScore,
    pouw::{Task, TaskStatus},
    reputation::{EpochRecord, MinerState},
};
use indexmap::{IndexMap, IndexSet};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Default)]
pub struct MemoryStorage {
    blocks: HashMap<Hash, Arc<Block>>,
    scores: HashMap<Hash, CumulativeScore>,
    children: HashMap<Hash, IndexSet<Hash>>,
    by_height: HashMap<u64, Vec<Hash>>,
    main_chain: HashSet<Hash>,
    tips: Tips,
    tree_nodes: HashMap<(u8, u64), Hash>,
    tree_root: Option<Hash>,
    tree_size: u64,
    nullifiers: HashMap<Hash, NullifierInfo>,
    miners: HashMap<Address, MinerState>,
    epochs: HashMap<u64, EpochRecord>,
    tasks: IndexMap<Hash, Task>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlockProvider for MemoryStorage {
    async fn has_block(&self, hash: &Hash) -> Result<bool, BlockchainError> {
        Ok(self.blocks.contains_key(hash))
    }

    async fn save_block(
        &mut self,
        block: Arc<Block>,
        score: CumulativeScore,
    ) -> Result<(), BlockchainError> {
        let hash = block.hash();
        for parent in block.get_header().get_parents() {
            self.children
                .entry(parent.clone())
                .or_default()
                .insert(hash.clone());
        }
        self.by_height
            .entry(block.get_header().height)
            .or_default()
            .push(hash.clone());
        self.scores.insert(hash.clone(), score);
        self.blocks.insert(hash, block);
        Ok(())
    }

    async fn get_block_by_hash(&self, hash: &Hash) -> Result<Arc<Block>, BlockchainError> {
        self.blocks
            .get(hash)
            .cloned()
            .ok_or_else(|| BlockchainError::NotFound(hash.clone()))
    }

    async fn get_blocks_at_height(&self, height: u64) -> Result<Vec<Hash>, BlockchainError> {
        Ok(self.by_height.get(&height).cloned().unwrap_or_default())
    }

    async fn get_children(&self, hash: &Hash) -> Result<IndexSet<Hash>, BlockchainError> {
        Ok(self.children.get(hash).cloned().unwrap_or_default())
    }

    async fn get_cumulative_score(
        &self,
        hash: &Hash,
    ) -> Result<CumulativeScore, BlockchainError> {
        self.scores
            .get(hash)
            .copied()
            .ok_or_else(|| BlockchainError::NotFound(hash.clone()))
    }

    async fn mark_main_chain(
        &mut self,
        on: &[Hash],
        off: &[Hash],
    ) -> Result<(), BlockchainError> {
        for hash in off {
            self.main_chain.remove(hash);
        }
        for hash in on {
            self.main_chain.insert(hash.clone());
        }
        Ok(())
    }

    async fn is_main_chain(&self, hash: &Hash) -> Result<bool, BlockchainError> {
        Ok(self.main_chain.contains(hash))
    }

    async fn get_tips(&self) -> Result<Tips, BlockchainError> {
        Ok(self.tips.clone())
    }

    async fn store_tips(&mut self, tips: &Tips) -> Result<(), BlockchainError> {
        self.tips = tips.clone();
        Ok(())
    }
}

#[async_trait]
impl CommitmentTreeProvider for MemoryStorage {
    async fn get_tree_node(
        &self,
        level: u8,
        index: u64,
    ) -> Result<Option<Hash>, BlockchainError> {
        Ok(self.tree_nodes.get(&(level, index)).cloned())
    }

    async fn set_tree_node(
        &mut self,
        level: u8,
        index: u64,
        node: Hash,
    ) -> Result<(), BlockchainError> {
        self.tree_nodes.insert((level, index), node);
        Ok(())
    }

    async fn get_tree_root(&self) -> Result<Option<Hash>, BlockchainError> {
        Ok(self.tree_root.clone())
    }

    async fn set_tree_root(&mut self, root: Hash) -> Result<(), BlockchainError> {
        self.tree_root = Some(root);
        Ok(())
    }

    async fn get_tree_size(&self) -> Result<u64, BlockchainError> {
        Ok(self.tree_size)
    }

    async fn set_tree_size(&mut self, size: u64) -> Result<(), BlockchainError> {
        self.tree_size = size;
        Ok(())
    }
}

#[async_trait]
impl NullifierProvider for MemoryStorage {
    async fn has_nullifier(&self, nullifier: &Hash) -> Result<bool, BlockchainError> {
        Ok(self.nullifiers.contains_key(nullifier))
    }

    async fn add_nullifier(
        &mut self,
        nullifier: Hash,
        tx_hash: Hash,
        height: u64,
    ) -> Result<(), BlockchainError> {
        if self.nullifiers.contains_key(&nullifier) {
            return Err(BlockchainError::NullifierSpent(nullifier));
        }
        self.nullifiers
            .insert(nullifier, NullifierInfo { tx_hash, height });
        Ok(())
    }

    async fn remove_nullifier(&mut self, nullifier: &Hash) -> Result<(), BlockchainError> {
        self.nullifiers.remove(nullifier);
        Ok(())
    }

    async fn get_nullifier_info(
        &self,
        nullifier: &Hash,
    ) -> Result<Option<NullifierInfo>, BlockchainError> {
        Ok(self.nullifiers.get(nullifier).cloned())
    }

    async fn count_nullifiers(&self) -> Result<u64, BlockchainError> {
        Ok(self.nullifiers.len() as u64)
    }
}

#[async_trait]
impl ReputationProvider for MemoryStorage {
    async fn get_miner(
        &self,
        address: &Address,
    ) -> Result<Option<MinerState>, BlockchainError> {
        Ok(self.miners.get(address).cloned())
    }

    async fn save_miner(&mut self, state: &MinerState) -> Result<(), BlockchainError> {
        self.miners.insert(state.address.clone(), state.clone());
        Ok(())
    }

    async fn list_miners(&self) -> Result<Vec<Address>, BlockchainError> {
        Ok(self.miners.keys().cloned().collect())
    }

    async fn save_epoch(&mut self, record: &EpochRecord) -> Result<(), BlockchainError> {
        self.epochs.insert(record.epoch, record.clone());
        Ok(())
    }

    async fn get_epoch(&self, epoch: u64) -> Result<Option<EpochRecord>, BlockchainError> {
        Ok(self.epochs.get(&epoch).cloned())
    }
}

#[async_trait]
impl TaskProvider for MemoryStorage {
    async fn save_task(&mut self, task: &Task) -> Result<(), BlockchainError> {
        self.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get_task(&self, id: &Hash) -> Result<Option<Task>, BlockchainError> {
        Ok(self.tasks.get(id).cloned())
    }

    async fn next_pending_task(&self) -> Result<Option<Task>, BlockchainError> {
        Ok(self.tasks.values().find(|t| t.is_pending()).cloned())
    }

    async fn assigned_tasks(&self) -> Result<Vec<Task>, BlockchainError> {
        Ok(self
            .tasks
            .values()
            .filter(|t| matches!(t.status, TaskStatus::Assigned { .. }))
            .cloned()
            .collect())
    }
}
