use crate::crypto::Hash;
use primitive_types::U256;
use thiserror::Error;

// Difficulty is the target the block hash must stay strictly under,
// interpreted as a big-endian 256-bit integer.
pub type Difficulty = U256;
// Cumulative score is the reputation-weighted work from genesis to a block.
// It is used to determine which branch is the main chain when tips compete.
pub type CumulativeScore = U256;

#[derive(Error, Debug)]
pub enum DifficultyError {
    #[error("Difficulty cannot be a value zero")]
    DifficultyCannotBeZero,
}

// Verify a block hash against its difficulty target
// All operations are done on U256 to avoid overflow
pub fn check_difficulty(hash: &Hash, difficulty: &Difficulty) -> Result<bool, DifficultyError> {
    if difficulty.is_zero() {
        return Err(DifficultyError::DifficultyCannotBeZero);
    }

    Ok(hash_as_integer(hash) < *difficulty)
}

// Interpret a hash as a big-endian 256-bit integer
#[inline(always)]
pub fn hash_as_integer(hash: &Hash) -> U256 {
    U256::from_big_endian(hash.as_bytes())
}

// Expected work for a block: 2^256 / (difficulty + 1)
// Computed without overflowing U256: floor((MAX + 1) / d) = floor(MAX / d)
// plus one when MAX % d == d - 1.
pub fn work_from_difficulty(difficulty: &Difficulty) -> U256 {
    let divisor = difficulty.saturating_add(U256::one());
    let quotient = U256::MAX / divisor;
    let remainder = U256::MAX % divisor;
    if remainder == divisor - U256::one() {
        quotient.saturating_add(U256::one())
    } else {
        quotient
    }
}

// Multiply a difficulty by num/den without overflowing:
// d/den*num + (d%den)*num/den. Exact when den divides d or num.
pub fn mul_ratio(value: U256, num: u64, den: u64) -> U256 {
    debug_assert!(den > 0);
    let num = U256::from(num);
    let den = U256::from(den);
    (value / den)
        .saturating_mul(num)
        .saturating_add((value % den) * num / den)
}
