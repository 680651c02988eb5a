use crate::core::error::BlockchainError;
use async_trait::async_trait;
use gradia_common::crypto::Hash;
use serde::{Deserialize, Serialize};

/// Where a nullifier was first recorded
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NullifierInfo {
    pub tx_hash: Hash,
    pub height: u64,
}

#[async_trait]
pub trait NullifierProvider {
    async fn has_nullifier(&self, nullifier: &Hash) -> Result<bool, BlockchainError>;

    // Record a spend. Fails with NullifierSpent when already present:
    // the store, not the caller, is the double-spend authority.
    async fn add_nullifier(
        &mut self,
        nullifier: Hash,
        tx_hash: Hash,
        height: u64,
    ) -> Result<(), BlockchainError>;

    // Unwind a spend whose block left the main chain during a reorg.
    // The only path that ever removes a nullifier.
    async fn remove_nullifier(&mut self, nullifier: &Hash) -> Result<(), BlockchainError>;

    async fn get_nullifier_info(
        &self,
        nullifier: &Hash,
    ) -> Result<Option<NullifierInfo>, BlockchainError>;

    async fn count_nullifiers(&self) -> Result<u64, BlockchainError>;
}
