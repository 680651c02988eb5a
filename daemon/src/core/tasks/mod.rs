// Task scheduling.
//
// Training tasks queue up as Pending and get leased to miners for a
// bounded number of blocks. Deadlines are heights, never wall-clock:
// on every new main-chain height the scheduler reclaims expired leases
// back to Pending. Miners park on the Notify handle instead of
// polling; publication and reclamation both wake them.

use crate::core::{error::BlockchainError, storage::TaskProvider};
use gradia_common::{
    config::ChainParams,
    crypto::{Address, Hash},
    pouw::Task,
};
use log::{debug, trace};
use std::sync::Arc;
use tokio::sync::Notify;

pub struct TaskScheduler {
    params: Arc<ChainParams>,
    notify: Arc<Notify>,
    current_height: u64,
}

impl TaskScheduler {
    pub fn new(params: Arc<ChainParams>) -> Self {
        Self {
            params,
            notify: Arc::new(Notify::new()),
            current_height: 0,
        }
    }

    /// Handle miners wait on for new work
    pub fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    pub fn current_height(&self) -> u64 {
        self.current_height
    }

    /// Queue a new task and wake waiting miners
    pub async fn publish<P: TaskProvider>(
        &self,
        provider: &mut P,
        task: Task,
    ) -> Result<(), BlockchainError> {
        if !task.is_pending() {
            return Err(BlockchainError::StructurallyInvalid(
                "published task must be pending",
            ));
        }
        debug!("publishing task {}", task.id);
        provider.save_task(&task).await?;
        self.notify.notify_waiters();
        Ok(())
    }

    /// Lease the oldest pending task to a miner. The lease expires at
    /// current height + task_lease.
    pub async fn try_assign<P: TaskProvider>(
        &self,
        provider: &mut P,
        miner: &Address,
    ) -> Result<Option<Task>, BlockchainError> {
        let Some(mut task) = provider.next_pending_task().await? else {
            return Ok(None);
        };

        let deadline = self.current_height + self.params.task_lease;
        if !task.assign(miner.clone(), deadline) {
            return Ok(None);
        }
        provider.save_task(&task).await?;
        trace!("task {} leased to {} until height {}", task.id, miner, deadline);
        Ok(Some(task))
    }

    /// Mark a leased task completed (its block was accepted)
    pub async fn complete<P: TaskProvider>(
        &self,
        provider: &mut P,
        id: &Hash,
    ) -> Result<(), BlockchainError> {
        let mut task = provider
            .get_task(id)
            .await?
            .ok_or_else(|| BlockchainError::NotFound(id.clone()))?;
        if task.complete() {
            provider.save_task(&task).await?;
        }
        Ok(())
    }

    /// Mark a task failed (its submitted work did not validate)
    pub async fn fail<P: TaskProvider>(
        &self,
        provider: &mut P,
        id: &Hash,
    ) -> Result<(), BlockchainError> {
        let mut task = provider
            .get_task(id)
            .await?
            .ok_or_else(|| BlockchainError::NotFound(id.clone()))?;
        task.fail();
        provider.save_task(&task).await
    }

    /// Height tick from the DAG: reclaim expired leases.
    /// Returns how many assignments went back to Pending.
    pub async fn on_new_height<P: TaskProvider>(
        &mut self,
        provider: &mut P,
        height: u64,
    ) -> Result<usize, BlockchainError> {
        self.current_height = height;

        let mut reclaimed = 0;
        for mut task in provider.assigned_tasks().await? {
            if task.reclaim_if_expired(height) {
                debug!("lease on task {} expired, back to pending", task.id);
                provider.save_task(&task).await?;
                reclaimed += 1;
            }
        }

        if reclaimed > 0 {
            self.notify.notify_waiters();
        }
        Ok(reclaimed)
    }
}
