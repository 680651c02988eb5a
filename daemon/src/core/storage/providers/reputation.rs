use crate::core::error::BlockchainError;
use async_trait::async_trait;
use gradia_common::{
    crypto::Address,
    reputation::{EpochRecord, MinerState},
};

#[async_trait]
pub trait ReputationProvider {
    async fn get_miner(&self, address: &Address) -> Result<Option<MinerState>, BlockchainError>;

    async fn save_miner(&mut self, state: &MinerState) -> Result<(), BlockchainError>;

    // Every known miner, needed for the epoch-boundary inactivity sweep
    async fn list_miners(&self) -> Result<Vec<Address>, BlockchainError>;

    async fn save_epoch(&mut self, record: &EpochRecord) -> Result<(), BlockchainError>;

    async fn get_epoch(&self, epoch: u64) -> Result<Option<EpochRecord>, BlockchainError>;
}
