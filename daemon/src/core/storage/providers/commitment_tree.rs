use crate::core::error::BlockchainError;
use async_trait::async_trait;
use gradia_common::crypto::Hash;

// Nodes are addressed by (level, index): level 0 holds the leaves,
// level D the root. Only nodes on filled paths are ever persisted,
// empty subtrees keep their precomputed constant roots.
#[async_trait]
pub trait CommitmentTreeProvider {
    async fn get_tree_node(&self, level: u8, index: u64)
        -> Result<Option<Hash>, BlockchainError>;

    async fn set_tree_node(
        &mut self,
        level: u8,
        index: u64,
        node: Hash,
    ) -> Result<(), BlockchainError>;

    async fn get_tree_root(&self) -> Result<Option<Hash>, BlockchainError>;

    async fn set_tree_root(&mut self, root: Hash) -> Result<(), BlockchainError>;

    async fn get_tree_size(&self) -> Result<u64, BlockchainError>;

    async fn set_tree_size(&mut self, size: u64) -> Result<(), BlockchainError>;
}
