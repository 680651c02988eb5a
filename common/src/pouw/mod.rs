//! Proof-of-Useful-Work types.
//!
//! A miner's useful work is one verified gradient step on a community
//! model: the claim commits to the weights before and after, the
//! gradient, the batch it was computed on, and the observed loss
//! reduction. The claim hash is the block's PoUW result.

mod task;

pub use task::{Task, TaskStatus};

use crate::{
    crypto::{hash, Hash},
    score::{quality_from_losses, ScaledScore},
};
use serde::{Deserialize, Serialize};

/// The gradient update a block claims as its useful work.
///
/// Loss values are fixed-point, scaled by `LOSS_SCALE`. The claimed
/// `quality` must match the loss reduction within the consensus
/// tolerance (the Improvement Gate).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradientClaim {
    /// Commitment to the model weights before the update
    pub weights_before: Hash,
    /// Commitment to the model weights after the update
    pub weights_after: Hash,
    /// Hash of the gradient tensor
    pub gradient_hash: Hash,
    /// Commitment to the training batch
    pub batch_commitment: Hash,
    /// Loss before the update, in LOSS_SCALE units
    pub loss_before: u64,
    /// Loss after the update, in LOSS_SCALE units
    pub loss_after: u64,
    /// Claimed quality score, in SCALE units
    pub quality: ScaledScore,
    /// VRF seed of the previous iteration, input to subset selection
    pub prior_vrf_seed: Hash,
    /// Training iteration index
    pub iteration: u64,
    /// Batch indices the miner re-executed for the verification subset
    pub verified_indices: Vec<u64>,
}

/// Public inputs the gradient proof is verified against
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GradientPublicInputs<'a> {
    pub weights_before: &'a Hash,
    pub weights_after: &'a Hash,
    pub gradient_hash: &'a Hash,
    pub batch_commitment: &'a Hash,
    pub loss_before: u64,
    pub loss_after: u64,
    pub quality: ScaledScore,
}

impl GradientClaim {
    /// Claim hash, carried in the block header as the PoUW result
    pub fn hash(&self) -> Hash {
        let mut bytes = Vec::with_capacity(32 * 5 + 8 * 4 + self.verified_indices.len() * 8);
        bytes.extend(self.weights_before.as_bytes());
        bytes.extend(self.weights_after.as_bytes());
        bytes.extend(self.gradient_hash.as_bytes());
        bytes.extend(self.batch_commitment.as_bytes());
        bytes.extend(self.loss_before.to_be_bytes());
        bytes.extend(self.loss_after.to_be_bytes());
        bytes.extend(self.quality.to_be_bytes());
        bytes.extend(self.prior_vrf_seed.as_bytes());
        bytes.extend(self.iteration.to_be_bytes());
        bytes.extend((self.verified_indices.len() as u32).to_be_bytes());
        for index in &self.verified_indices {
            bytes.extend(index.to_be_bytes());
        }
        hash(&bytes)
    }

    /// Quality the loss values imply, None when the Improvement Gate
    /// is not met
    pub fn expected_quality(&self) -> Option<ScaledScore> {
        quality_from_losses(self.loss_before, self.loss_after)
    }

    pub fn public_inputs(&self) -> GradientPublicInputs<'_> {
        GradientPublicInputs {
            weights_before: &self.weights_before,
            weights_after: &self.weights_after,
            gradient_hash: &self.gradient_hash,
            batch_commitment: &self.batch_commitment,
            loss_before: self.loss_before,
            loss_after: self.loss_after,
            quality: self.quality,
        }
    }
}
