use crate::{crypto::{Address, Hash}, difficulty::Difficulty, score::ScaledScore};
use serde::{Deserialize, Serialize};

/// Assignment state of a training task.
///
/// Pending -> Assigned -> Completed is the happy path. An assignment
/// whose deadline height passes returns to Pending; a task whose
/// submitted work fails validation stays Failed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Assigned {
        miner: Address,
        /// Block height at which the lease expires
        deadline: u64,
    },
    Completed,
    Failed,
}

/// A unit of useful work: one gradient step on a slice of a dataset
/// against a published model checkpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: Hash,
    /// Target model content id
    pub model_id: Hash,
    /// Dataset content id
    pub dataset_id: Hash,
    /// Batch index range [start, end)
    pub batch_start: u64,
    pub batch_end: u64,
    /// Current weights content id
    pub weights_id: Hash,
    /// Learning rate in SCALE units
    pub learning_rate: ScaledScore,
    /// Difficulty the mined block must satisfy
    pub difficulty: Difficulty,
    pub reward: u64,
    pub status: TaskStatus,
}

impl Task {
    pub fn batch_size(&self) -> u64 {
        self.batch_end.saturating_sub(self.batch_start)
    }

    pub fn is_pending(&self) -> bool {
        self.status == TaskStatus::Pending
    }

    /// Lease the task to a miner until `deadline` height.
    /// Returns false when the task is not pending.
    pub fn assign(&mut self, miner: Address, deadline: u64) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.status = TaskStatus::Assigned { miner, deadline };
        true
    }

    /// Mark the leased task completed. Only a live assignment completes.
    pub fn complete(&mut self) -> bool {
        match self.status {
            TaskStatus::Assigned { .. } => {
                self.status = TaskStatus::Completed;
                true
            }
            _ => false,
        }
    }

    pub fn fail(&mut self) {
        self.status = TaskStatus::Failed;
    }

    /// Reclaim an expired assignment back to pending.
    /// Returns true when the lease had expired at `height`.
    pub fn reclaim_if_expired(&mut self, height: u64) -> bool {
        match self.status {
            TaskStatus::Assigned { deadline, .. } if height > deadline => {
                self.status = TaskStatus::Pending;
                true
            }
            _ => false,
        }
    }
}
