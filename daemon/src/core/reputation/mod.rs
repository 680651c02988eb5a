// Reputation engine.
//
// Drives the per-miner EWMA score, the per-epoch accounting, the
// penalty/ban state machine and stake slashing. All arithmetic is the
// deterministic scaled-integer math from gradia_common::score; the
// provider is the authoritative miner store and every mutation is
// written back before the call returns.

use crate::core::{error::BlockchainError, storage::ReputationProvider};
use gradia_common::{
    config::ChainParams,
    crypto::{Address, Hash},
    reputation::{EpochRecord, MinerState, Offense, Penalty},
    score::{ScaledScore, SCALE},
};
use log::{debug, trace, warn};
use std::collections::HashSet;
use std::sync::Arc;

pub struct ReputationEngine {
    params: Arc<ChainParams>,
    current_epoch: u64,
    epoch: EpochRecord,
    // Slashing is idempotent per evidence hash
    evidence_seen: HashSet<Hash>,
}

impl ReputationEngine {
    pub fn new(params: Arc<ChainParams>) -> Self {
        let epoch = EpochRecord::new(0, params.epoch_length);
        Self {
            params,
            current_epoch: 0,
            epoch,
            evidence_seen: HashSet::new(),
        }
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_epoch
    }

    pub fn current_epoch_record(&self) -> &EpochRecord {
        &self.epoch
    }

    async fn get_or_create<P: ReputationProvider>(
        &self,
        provider: &P,
        address: &Address,
    ) -> Result<MinerState, BlockchainError> {
        Ok(provider
            .get_miner(address)
            .await?
            .unwrap_or_else(|| MinerState::new(address.clone())))
    }

    /// Current score of a miner, the initial reputation when unknown
    pub async fn get_score<P: ReputationProvider>(
        &self,
        provider: &P,
        address: &Address,
    ) -> Result<ScaledScore, BlockchainError> {
        Ok(self.get_or_create(provider, address).await?.score)
    }

    /// Whether the miner may produce a block at `height`:
    /// not banned, not forced out, and bonded above the minimum stake
    pub async fn check_eligibility<P: ReputationProvider>(
        &self,
        provider: &P,
        address: &Address,
        height: u64,
    ) -> Result<(), BlockchainError> {
        let miner = self.get_or_create(provider, address).await?;
        if let Some(until) = miner.banned_until {
            if height < until {
                return Err(BlockchainError::MinerBanned { until });
            }
        }
        if miner.exited || miner.stake.total < self.params.min_stake {
            return Err(BlockchainError::InsufficientStake {
                required: self.params.min_stake,
                available: miner.stake.total,
            });
        }
        Ok(())
    }

    /// Record one accepted block from a miner
    pub async fn record_block<P: ReputationProvider>(
        &mut self,
        provider: &mut P,
        address: &Address,
        quality: ScaledScore,
        height: u64,
    ) -> Result<ScaledScore, BlockchainError> {
        let epoch = self.params.epoch_at_height(height);
        let mut miner = self.get_or_create(provider, address).await?;
        miner.record_block(quality, epoch);
        let score = miner.score;
        provider.save_miner(&miner).await?;

        let stats = self.epoch.stats_mut(address);
        stats.blocks += 1;
        stats.quality_sum += quality;

        trace!(
            "recorded block for {} at height {}: quality {}, score {}",
            address,
            height,
            quality,
            score
        );
        Ok(score)
    }

    /// Apply an explicit penalty event
    pub async fn apply_penalty<P: ReputationProvider>(
        &mut self,
        provider: &mut P,
        address: &Address,
        penalty: Penalty,
    ) -> Result<ScaledScore, BlockchainError> {
        let mut miner = self.get_or_create(provider, address).await?;
        let score = miner.apply_penalty(penalty);
        provider.save_miner(&miner).await?;
        self.epoch.stats_mut(address).penalties += 1;
        debug!("penalty {:?} on {}: score now {}", penalty, address, score);
        Ok(score)
    }

    /// Roll epochs forward until `new_epoch` is current. For each epoch
    /// crossed: decay miners inactive in the ending epoch, auto-ban
    /// everyone under the threshold, and finalize the epoch record.
    pub async fn advance_to_epoch<P: ReputationProvider>(
        &mut self,
        provider: &mut P,
        new_epoch: u64,
        height: u64,
    ) -> Result<(), BlockchainError> {
        while self.current_epoch < new_epoch {
            let ending = self.current_epoch;
            debug!("finalizing epoch {}", ending);

            for address in provider.list_miners().await? {
                let mut miner = self.get_or_create(provider, &address).await?;
                if miner.last_active_epoch < ending {
                    miner.apply_inactivity(1);
                }
                if miner.score < self.params.ban_threshold && miner.banned_until.is_none() {
                    let until = height + self.params.ban_duration;
                    warn!("auto-ban {}: score {} until height {}", address, miner.score, until);
                    miner.banned_until = Some(until);
                }
                provider.save_miner(&miner).await?;
            }

            self.epoch.finalized = true;
            provider.save_epoch(&self.epoch).await?;

            self.current_epoch += 1;
            self.epoch = EpochRecord::new(self.current_epoch, self.params.epoch_length);
        }
        Ok(())
    }

    /// Bond stake. The deposit locks the whole bond until
    /// height + stake_lock_period.
    pub async fn deposit_stake<P: ReputationProvider>(
        &mut self,
        provider: &mut P,
        address: &Address,
        amount: u64,
        height: u64,
    ) -> Result<(), BlockchainError> {
        let mut miner = self.get_or_create(provider, address).await?;
        miner.stake.total += amount;
        miner.stake.available += amount;
        miner.stake.deposited_total += amount;
        miner.stake.locked_until = height + self.params.stake_lock_period;
        provider.save_miner(&miner).await
    }

    pub async fn withdraw_stake<P: ReputationProvider>(
        &mut self,
        provider: &mut P,
        address: &Address,
        amount: u64,
        height: u64,
    ) -> Result<(), BlockchainError> {
        let mut miner = self.get_or_create(provider, address).await?;
        if height < miner.stake.locked_until {
            return Err(BlockchainError::StakeLocked {
                until: miner.stake.locked_until,
            });
        }
        if amount > miner.stake.available {
            return Err(BlockchainError::InsufficientStake {
                required: amount,
                available: miner.stake.available,
            });
        }
        miner.stake.total -= amount;
        miner.stake.available -= amount;
        provider.save_miner(&miner).await
    }

    /// Slash a fraction of the miner's bonded stake for an offense.
    /// Idempotent per evidence hash: a duplicate submission is a no-op
    /// returning 0. Crossing the forced-exit ratio consumes all
    /// remaining stake and the miner becomes mining-ineligible for good.
    pub async fn slash<P: ReputationProvider>(
        &mut self,
        provider: &mut P,
        address: &Address,
        offense: Offense,
        evidence: Hash,
    ) -> Result<u64, BlockchainError> {
        if self.evidence_seen.contains(&evidence) {
            trace!("duplicate slashing evidence {}, ignoring", evidence);
            return Ok(0);
        }

        let mut miner = self.get_or_create(provider, address).await?;
        let mut amount = miner.stake.total * offense.slash_rate() / SCALE;
        miner.stake.total -= amount;
        miner.stake.available = miner.stake.available.min(miner.stake.total);
        miner.stake.slashed_total += amount;

        if miner.stake.slashing_ratio() >= self.params.forced_exit_ratio {
            warn!(
                "forced exit for {}: slashing ratio {} over {}",
                address,
                miner.stake.slashing_ratio(),
                self.params.forced_exit_ratio
            );
            amount += miner.stake.total;
            miner.stake.slashed_total += miner.stake.total;
            miner.stake.total = 0;
            miner.stake.available = 0;
            miner.exited = true;
        }

        provider.save_miner(&miner).await?;
        self.evidence_seen.insert(evidence);
        self.epoch.stats_mut(address).slashes += 1;
        debug!("slashed {} of {} for {:?}", amount, address, offense);
        Ok(amount)
    }
}
