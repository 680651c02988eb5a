// Mining loop.
//
// A long-lived task per miner: lease a task from the scheduler, run
// the gradient computation and proving (injected worker), submit the
// result. Backpressure comes from the scheduler's Notify handle, the
// loop parks when the queue is empty and never spins. Cancellation
// stops the loop at the next suspension point with no partial
// submission.

use crate::core::{
    error::BlockchainError,
    storage::TaskProvider,
    tasks::TaskScheduler,
};
use async_trait::async_trait;
use gradia_common::{crypto::Address, pouw::{GradientClaim, Task}};
use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify, RwLock};
use tokio_util::sync::CancellationToken;

/// The compute side of mining: run one gradient step for a task and
/// produce the claim plus its zk proof. CPU/GPU-bound, runs outside
/// every component lock.
#[async_trait]
pub trait GradientWorker: Send + Sync {
    async fn solve(
        &self,
        task: &Task,
        token: &CancellationToken,
    ) -> Result<(GradientClaim, Vec<u8>), BlockchainError>;
}

/// A finished unit of useful work, ready for block assembly
pub struct MinedWork {
    pub task: Task,
    pub claim: GradientClaim,
    pub proof: Vec<u8>,
}

pub struct MiningLoop<P: TaskProvider, W: GradientWorker> {
    miner: Address,
    scheduler: Arc<RwLock<TaskScheduler>>,
    provider: Arc<RwLock<P>>,
    worker: Arc<W>,
    notify: Arc<Notify>,
    submissions: mpsc::Sender<MinedWork>,
    token: CancellationToken,
}

impl<P: TaskProvider + Send + Sync, W: GradientWorker> MiningLoop<P, W> {
    pub async fn new(
        miner: Address,
        scheduler: Arc<RwLock<TaskScheduler>>,
        provider: Arc<RwLock<P>>,
        worker: Arc<W>,
        submissions: mpsc::Sender<MinedWork>,
        token: CancellationToken,
    ) -> Self {
        let notify = scheduler.read().await.notifier();
        Self {
            miner,
            scheduler,
            provider,
            worker,
            notify,
            submissions,
            token,
        }
    }

    pub async fn run(self) {
        debug!("mining loop started for {}", self.miner);
        loop {
            let task = tokio::select! {
                _ = self.token.cancelled() => break,
                task = self.next_task() => match task {
                    Ok(task) => task,
                    Err(BlockchainError::Cancelled) => break,
                    Err(e) => {
                        warn!("mining loop stopping on storage error: {}", e);
                        break;
                    }
                },
            };

            match self.worker.solve(&task, &self.token).await {
                Ok((claim, proof)) => {
                    let work = MinedWork { task, claim, proof };
                    if self.submissions.send(work).await.is_err() {
                        // Receiver gone: the node is shutting down
                        break;
                    }
                }
                Err(BlockchainError::Cancelled) => break,
                Err(e) => {
                    warn!("gradient worker failed on task {}: {}", task.id, e);
                }
            }
        }
        debug!("mining loop stopped for {}", self.miner);
    }

    // Lease the next task, parking on the scheduler's Notify while the
    // queue is empty. The Notified future is registered before the
    // queue check, so a publish between check and park is never missed.
    async fn next_task(&self) -> Result<Task, BlockchainError> {
        loop {
            let notified = self.notify.notified();

            {
                let scheduler = self.scheduler.read().await;
                let mut provider = self.provider.write().await;
                if let Some(task) = scheduler.try_assign(&mut *provider, &self.miner).await? {
                    return Ok(task);
                }
            }

            tokio::select! {
                _ = self.token.cancelled() => return Err(BlockchainError::Cancelled),
                _ = notified => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::MemoryStorage;
    use gradia_common::{config::ChainParams, crypto::{hash, Hash}, pouw::TaskStatus};
    use primitive_types::U256;
    use std::time::Duration;

    struct InstantWorker;

    #[async_trait]
    impl GradientWorker for InstantWorker {
        async fn solve(
            &self,
            task: &Task,
            _token: &CancellationToken,
        ) -> Result<(GradientClaim, Vec<u8>), BlockchainError> {
            Ok((
                GradientClaim {
                    weights_before: task.weights_id.clone(),
                    weights_after: hash(b"updated"),
                    gradient_hash: hash(task.id.as_bytes()),
                    batch_commitment: hash(b"batch"),
                    loss_before: 500_000,
                    loss_after: 450_000,
                    quality: 1_000,
                    prior_vrf_seed: Hash::zero(),
                    iteration: 0,
                    verified_indices: vec![],
                },
                vec![0u8; 8],
            ))
        }
    }

    fn pending_task(seed: u8) -> Task {
        Task {
            id: hash(&[seed]),
            model_id: hash(b"model"),
            dataset_id: hash(b"data"),
            batch_start: 0,
            batch_end: 100,
            weights_id: hash(b"weights"),
            learning_rate: 10,
            difficulty: U256::MAX,
            reward: 1,
            status: TaskStatus::Pending,
        }
    }

    #[tokio::test]
    async fn test_loop_solves_published_work() {
        let params = Arc::new(ChainParams::default());
        let scheduler = Arc::new(RwLock::new(TaskScheduler::new(params)));
        let provider = Arc::new(RwLock::new(MemoryStorage::new()));
        let (tx, mut rx) = mpsc::channel(4);
        let token = CancellationToken::new();

        let mining = MiningLoop::new(
            Address::from_public_key(&[7u8; 32]),
            scheduler.clone(),
            provider.clone(),
            Arc::new(InstantWorker),
            tx,
            token.clone(),
        )
        .await;
        let handle = tokio::spawn(mining.run());

        // Publish after the loop is parked
        tokio::time::sleep(Duration::from_millis(20)).await;
        {
            let scheduler = scheduler.read().await;
            let mut storage = provider.write().await;
            scheduler
                .publish(&mut *storage, pending_task(1))
                .await
                .unwrap();
        }

        let work = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("work produced")
            .expect("channel open");
        assert_eq!(work.task.id, hash(&[1u8]));
        assert_eq!(work.claim.quality, 1_000);

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop exits on cancellation")
            .unwrap();
    }

    #[tokio::test]
    async fn test_loop_exits_promptly_when_idle_and_cancelled() {
        let params = Arc::new(ChainParams::default());
        let scheduler = Arc::new(RwLock::new(TaskScheduler::new(params)));
        let provider = Arc::new(RwLock::new(MemoryStorage::new()));
        let (tx, _rx) = mpsc::channel(4);
        let token = CancellationToken::new();

        let mining = MiningLoop::new(
            Address::from_public_key(&[8u8; 32]),
            scheduler,
            provider,
            Arc::new(InstantWorker),
            tx,
            token.clone(),
        )
        .await;
        let handle = tokio::spawn(mining.run());

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("idle loop exits on cancellation")
            .unwrap();
    }
}
