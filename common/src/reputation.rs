//! Miner reputation and stake state.
//!
//! Reputation is an EWMA of observed useful-work quality, bounded to
//! [0.1, 3.0] in SCALE units. These types are pure data plus the exact
//! consensus transitions; the daemon's reputation engine drives them.

use crate::{
    crypto::{Address, Hash},
    score::{
        apply_inactivity_decay, apply_penalty, ewma_step, ScaledScore, REPUTATION_INITIAL, SCALE,
    },
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Explicit reputation penalties and their rates in SCALE units
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Penalty {
    InvalidBlock,
    DoubleVote,
    OfflineMissed,
    LowQuality,
}

impl Penalty {
    /// Multiplicative penalty rate: score is scaled by (1 - rate)
    pub fn rate(&self) -> u64 {
        match self {
            Penalty::InvalidBlock => 2_000,  // 20%
            Penalty::DoubleVote => 5_000,    // 50%
            Penalty::OfflineMissed => 500,   // 5%
            Penalty::LowQuality => 1_000,    // 10%
        }
    }
}

/// Slashable offenses and the stake fraction they consume
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Offense {
    InvalidBlock,
    DoubleSign,
    Equivocation,
    Censorship,
    FraudulentPoUW,
}

impl Offense {
    /// Fraction of the remaining stake consumed, in SCALE units
    pub fn slash_rate(&self) -> u64 {
        match self {
            Offense::InvalidBlock => 500,     // 5%
            Offense::DoubleSign => 2_000,     // 20%
            Offense::Equivocation => 1_000,   // 10%
            Offense::Censorship => 500,       // 5%
            Offense::FraudulentPoUW => 5_000, // 50%
        }
    }
}

/// Bonded stake of a miner
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeInfo {
    /// Currently bonded stake
    pub total: u64,
    /// Portion withdrawable once the lock expires
    pub available: u64,
    /// Height until which the last deposit stays locked
    pub locked_until: u64,
    /// Stake consumed by slashing over the miner's lifetime
    pub slashed_total: u64,
    /// Lifetime deposits, the denominator of the slashing ratio
    pub deposited_total: u64,
}

impl StakeInfo {
    /// Cumulative slashing ratio in SCALE units
    pub fn slashing_ratio(&self) -> u64 {
        if self.deposited_total == 0 {
            return 0;
        }
        self.slashed_total * SCALE / self.deposited_total
    }
}

/// Per-miner consensus state. Created on the miner's first block or
/// deposit, mutated on every block and epoch boundary, never destroyed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinerState {
    pub address: Address,
    /// EWMA reputation in SCALE units
    pub score: ScaledScore,
    pub total_blocks: u64,
    /// Lifetime sum of quality scores, in SCALE units
    pub total_quality: u64,
    /// Blocks and quality accumulated in the current epoch
    pub epoch_blocks: u64,
    pub epoch_quality: u64,
    pub last_active_epoch: u64,
    /// Height at which an active ban expires
    pub banned_until: Option<u64>,
    /// Forced out after excessive slashing, permanently mining-ineligible
    pub exited: bool,
    pub stake: StakeInfo,
}

impl MinerState {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            score: REPUTATION_INITIAL,
            total_blocks: 0,
            total_quality: 0,
            epoch_blocks: 0,
            epoch_quality: 0,
            last_active_epoch: 0,
            banned_until: None,
            exited: false,
            stake: StakeInfo::default(),
        }
    }

    pub fn is_banned(&self, height: u64) -> bool {
        matches!(self.banned_until, Some(expiry) if height < expiry)
    }

    /// Record one accepted block: EWMA step plus counters
    pub fn record_block(&mut self, quality: ScaledScore, epoch: u64) {
        self.score = ewma_step(self.score, quality);
        self.total_blocks += 1;
        self.total_quality += quality;
        if self.last_active_epoch != epoch {
            self.epoch_blocks = 0;
            self.epoch_quality = 0;
        }
        self.epoch_blocks += 1;
        self.epoch_quality += quality;
        self.last_active_epoch = epoch;
    }

    pub fn apply_penalty(&mut self, penalty: Penalty) -> ScaledScore {
        self.score = apply_penalty(self.score, penalty.rate());
        self.score
    }

    pub fn apply_inactivity(&mut self, missed_epochs: u64) -> ScaledScore {
        self.score = apply_inactivity_decay(self.score, missed_epochs);
        self.score
    }
}

/// Per-miner statistics inside one epoch record
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochMinerStats {
    pub blocks: u64,
    pub quality_sum: u64,
    pub penalties: u64,
    pub slashes: u64,
}

impl EpochMinerStats {
    /// Mean quality over the epoch, in SCALE units
    pub fn quality_mean(&self) -> u64 {
        if self.blocks == 0 {
            return 0;
        }
        self.quality_sum / self.blocks
    }
}

/// One finalized slice of chain history, epoch_length blocks long
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: u64,
    pub start_height: u64,
    pub end_height: u64,
    pub finalized: bool,
    pub miners: HashMap<Address, EpochMinerStats>,
}

impl EpochRecord {
    pub fn new(epoch: u64, epoch_length: u64) -> Self {
        Self {
            epoch,
            start_height: epoch * epoch_length,
            end_height: (epoch + 1) * epoch_length - 1,
            finalized: false,
            miners: HashMap::new(),
        }
    }

    pub fn stats_mut(&mut self, miner: &Address) -> &mut EpochMinerStats {
        self.miners.entry(miner.clone()).or_default()
    }
}
