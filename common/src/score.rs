// Consensus scoring arithmetic.
//
// All reputation and quality values are deterministic scaled integers:
// SCALE = 10_000 represents 1.0. Floating point is never used on a
// consensus path, every node must compute the exact same score.

/// Fixed-point score in SCALE units (10_000 = 1.0)
pub type ScaledScore = u64;

/// Scale factor: 10_000 represents 1.0
pub const SCALE: u64 = 10_000;

/// EWMA smoothing factor alpha = 0.1
pub const EWMA_ALPHA: u64 = 1_000;

/// Lower reputation bound (0.1)
pub const REPUTATION_MIN: ScaledScore = 1_000;

/// Upper reputation bound (3.0)
pub const REPUTATION_MAX: ScaledScore = 30_000;

/// Reputation of a miner that has never produced a block (1.0)
pub const REPUTATION_INITIAL: ScaledScore = 10_000;

/// Miners falling below this score at an epoch boundary are auto-banned (0.3)
pub const BAN_THRESHOLD: ScaledScore = 3_000;

/// Inactivity decay rate per missed epoch (0.05)
pub const INACTIVITY_DECAY_RATE: u64 = 500;

/// Loss values are scaled by 10^6 (1.0 = 1_000_000)
pub const LOSS_SCALE: u64 = 1_000_000;

/// Tolerance when re-deriving the quality score from losses: 10^-3 in SCALE units
pub const QUALITY_TOLERANCE: u64 = 10;

/// Clamp a reputation score into [REPUTATION_MIN, REPUTATION_MAX]
#[inline]
pub fn clamp_reputation(score: ScaledScore) -> ScaledScore {
    score.clamp(REPUTATION_MIN, REPUTATION_MAX)
}

/// One EWMA step: clamp(alpha * q + (1 - alpha) * score)
pub fn ewma_step(score: ScaledScore, quality: ScaledScore) -> ScaledScore {
    let blended = (EWMA_ALPHA * quality + (SCALE - EWMA_ALPHA) * score) / SCALE;
    clamp_reputation(blended)
}

/// Apply a multiplicative penalty: clamp(score * (1 - rate))
/// `rate` is in SCALE units, e.g. 2_000 for a 20% penalty
pub fn apply_penalty(score: ScaledScore, rate: u64) -> ScaledScore {
    debug_assert!(rate <= SCALE);
    clamp_reputation(score * (SCALE - rate) / SCALE)
}

/// Apply the inactivity decay (1 - 0.05)^epochs, clamped to bounds
pub fn apply_inactivity_decay(score: ScaledScore, epochs: u64) -> ScaledScore {
    let mut score = score;
    for _ in 0..epochs {
        score = score * (SCALE - INACTIVITY_DECAY_RATE) / SCALE;
        if score <= REPUTATION_MIN {
            break;
        }
    }
    clamp_reputation(score)
}

/// Quality bounds check: 0 < q <= 1
#[inline]
pub fn is_valid_quality(quality: ScaledScore) -> bool {
    quality > 0 && quality <= SCALE
}

/// Derive the quality score from an observed loss reduction.
/// Returns None when the gate is not met (no strict improvement).
pub fn quality_from_losses(loss_before: u64, loss_after: u64) -> Option<ScaledScore> {
    if loss_before == 0 || loss_after >= loss_before {
        return None;
    }
    Some((loss_before - loss_after) * SCALE / loss_before)
}
