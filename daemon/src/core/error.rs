use gradia_common::crypto::Hash;
use thiserror::Error;

/// Reason a useful-work claim was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoUWFailure {
    #[error("improvement gate failed: loss did not strictly decrease")]
    ImprovementGate,
    #[error("quality score out of bounds")]
    QualityOutOfBounds,
    #[error("gradient proof rejected")]
    ProofRejected,
    #[error("verification subset mismatch")]
    SubsetMismatch,
    #[error("gradient diversity violation")]
    DiversityViolation,
}

#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Object not found: {0}")]
    NotFound(Hash),

    #[error("Block {0} is already present")]
    Duplicate(Hash),

    // Not fatal: the block is suspended until its parents arrive
    #[error("Block {block} references unknown parent {parent}")]
    Orphan { block: Hash, parent: Hash },

    #[error("Structurally invalid: {0}")]
    StructurallyInvalid(&'static str),

    #[error("Invalid timestamp {timestamp} (bounds {min}..={max})")]
    TemporalInvalid {
        timestamp: u64,
        min: u64,
        max: u64,
    },

    #[error("Block hash does not meet the difficulty target")]
    DifficultyUnmet,

    #[error("Invalid useful work: {0}")]
    PoUWInvalid(PoUWFailure),

    #[error("Anchor {0} is not a recent commitment tree root")]
    AnchorUnknown(Hash),

    #[error("Nullifier {0} is already spent")]
    NullifierSpent(Hash),

    #[error("Nullifier {0} is spent twice within the block")]
    DoubleSpendIntraBlock(Hash),

    #[error("Fee {fee} is below the minimum {min}")]
    FeeTooLow { fee: u64, min: u64 },

    #[error("Mempool is full")]
    PoolFull,

    #[error("Stake is locked until height {until}")]
    StakeLocked { until: u64 },

    #[error("Insufficient stake: required {required}, available {available}")]
    InsufficientStake { required: u64, available: u64 },

    #[error("Miner is banned until height {until}")]
    MinerBanned { until: u64 },

    // Propagated without logging
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Storage failure: {0}")]
    StorageFailure(String),
}

impl BlockchainError {
    /// Orphans are absorbed by the caller, not treated as failures
    pub fn is_orphan(&self) -> bool {
        matches!(self, BlockchainError::Orphan { .. })
    }
}
