use crate::core::error::BlockchainError;
use async_trait::async_trait;
use gradia_common::{crypto::Hash, pouw::Task};

#[async_trait]
pub trait TaskProvider {
    async fn save_task(&mut self, task: &Task) -> Result<(), BlockchainError>;

    async fn get_task(&self, id: &Hash) -> Result<Option<Task>, BlockchainError>;

    // Oldest pending task, publication order
    async fn next_pending_task(&self) -> Result<Option<Task>, BlockchainError>;

    // Live assignments, scanned for expired leases on every new height
    async fn assigned_tasks(&self) -> Result<Vec<Task>, BlockchainError>;
}
