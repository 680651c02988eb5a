use crate::{
    difficulty::Difficulty,
    score::{ScaledScore, BAN_THRESHOLD, EWMA_ALPHA, REPUTATION_INITIAL, REPUTATION_MAX, REPUTATION_MIN, SCALE},
};
use primitive_types::U256;
use serde::{Deserialize, Serialize};

/// Current block format version
pub const BLOCK_VERSION: u8 = 1;

/// Current transaction format version
pub const TX_VERSION: u8 = 1;

/// Maximum number of parents a block may reference
pub const MAX_PARENTS: usize = 64;

/// Maximum number of transactions in a block
pub const MAX_BLOCK_TXS: usize = 10_000;

/// Maximum serialized size of the transactions selected into a block (1 MiB)
pub const MAX_BLOCK_SIZE: usize = 1_024 * 1_024;

/// Depth of the note commitment tree
pub const COMMITMENT_TREE_DEPTH: usize = 32;

// Immutable chain parameters.
// Constructed once at startup and shared by reference, components never
// mutate them. Defaults are the mainnet values.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainParams {
    /// Target seconds between blocks
    pub target_block_time: u64,
    /// Blocks per epoch
    pub epoch_length: u64,
    /// EWMA smoothing factor in SCALE units
    pub ewma_alpha: u64,
    /// Reputation bounds in SCALE units
    pub reputation_min: ScaledScore,
    pub reputation_max: ScaledScore,
    pub reputation_initial: ScaledScore,
    /// Auto-ban threshold at epoch boundaries, in SCALE units
    pub ban_threshold: ScaledScore,
    /// Ban duration in blocks
    pub ban_duration: u64,
    /// How many recent tree roots remain valid anchors
    pub recent_anchors_window: usize,
    /// Number of finalized blocks the difficulty controller averages over
    pub difficulty_window: usize,
    /// Difficulty target bounds
    pub minimum_difficulty: Difficulty,
    pub maximum_difficulty: Difficulty,
    /// Accepted clock skew for block timestamps, in seconds
    pub max_clock_skew: u64,
    /// Mempool capacity in transactions
    pub mempool_capacity: usize,
    /// Minimum transaction fee
    pub min_fee: u64,
    /// Fraction of the batch re-executed by verifiers, in SCALE units (0.01)
    pub subset_fraction: u64,
    /// Gradient similarity above this is fraudulent, in SCALE units (0.95)
    pub diversity_threshold: u64,
    /// How many recent gradient hashes per miner the diversity check spans
    pub diversity_window: usize,
    /// Minimum bonded stake to be mining-eligible
    pub min_stake: u64,
    /// Blocks a deposit stays locked after bonding
    pub stake_lock_period: u64,
    /// Cumulative slashing ratio forcing an exit, in SCALE units (0.75)
    pub forced_exit_ratio: u64,
    /// Blocks a task assignment stays leased before expiring back to pending
    pub task_lease: u64,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            target_block_time: 10,
            epoch_length: 1_000,
            ewma_alpha: EWMA_ALPHA,
            reputation_min: REPUTATION_MIN,
            reputation_max: REPUTATION_MAX,
            reputation_initial: REPUTATION_INITIAL,
            ban_threshold: BAN_THRESHOLD,
            ban_duration: 10_000,
            recent_anchors_window: 100,
            difficulty_window: 100,
            minimum_difficulty: U256::one() << 100,
            maximum_difficulty: U256::MAX,
            max_clock_skew: 120,
            mempool_capacity: 10_000,
            min_fee: 1,
            subset_fraction: SCALE / 100,
            diversity_threshold: 9_500,
            diversity_window: 16,
            min_stake: 1_000_000,
            stake_lock_period: 1_000,
            forced_exit_ratio: 7_500,
            task_lease: 100,
        }
    }
}

impl ChainParams {
    /// Epoch index a height belongs to
    #[inline]
    pub fn epoch_at_height(&self, height: u64) -> u64 {
        height / self.epoch_length
    }

    /// First height of an epoch
    #[inline]
    pub fn epoch_start(&self, epoch: u64) -> u64 {
        epoch * self.epoch_length
    }
}
