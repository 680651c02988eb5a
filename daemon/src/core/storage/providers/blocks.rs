use crate::core::{error::BlockchainError, storage::Tips};
use async_trait::async_trait;
use gradia_common::{block::Block, crypto::Hash, difficulty::CumulativeScore};
use indexmap::IndexSet;
use std::sync::Arc;

#[async_trait]
pub trait BlockProvider {
    async fn has_block(&self, hash: &Hash) -> Result<bool, BlockchainError>;

    // Persist a block with its derived cumulative score and index it
    // under its height and as a child of each parent
    async fn save_block(
        &mut self,
        block: Arc<Block>,
        score: CumulativeScore,
    ) -> Result<(), BlockchainError>;

    async fn get_block_by_hash(&self, hash: &Hash) -> Result<Arc<Block>, BlockchainError>;

    async fn get_blocks_at_height(&self, height: u64) -> Result<Vec<Hash>, BlockchainError>;

    async fn get_children(&self, hash: &Hash) -> Result<IndexSet<Hash>, BlockchainError>;

    async fn get_cumulative_score(&self, hash: &Hash)
        -> Result<CumulativeScore, BlockchainError>;

    // Flip main-chain membership for a reorg, atomically: every block in
    // `on` gains the flag, every block in `off` loses it
    async fn mark_main_chain(&mut self, on: &[Hash], off: &[Hash])
        -> Result<(), BlockchainError>;

    async fn is_main_chain(&self, hash: &Hash) -> Result<bool, BlockchainError>;

    // Get current chain tips
    async fn get_tips(&self) -> Result<Tips, BlockchainError>;

    // Store chain tips
    async fn store_tips(&mut self, tips: &Tips) -> Result<(), BlockchainError>;
}
