// Proof-of-Useful-Work validation.
//
// A block's mining proof is a gradient update. The validator applies,
// in order: quality bounds, the hash/difficulty target, the Improvement
// Gate on the carried losses, the injected zk verification of the
// gradient proof, the deterministic verification-subset selection, and
// the gradient diversity check against the miner's recent submissions.

use crate::{
    core::error::{BlockchainError, PoUWFailure},
    vrf::VrfSource,
};
use gradia_common::{
    block::BlockHeader,
    config::ChainParams,
    crypto::{hash, Address, Hash},
    difficulty::check_difficulty,
    pouw::{GradientClaim, GradientPublicInputs, Task},
    score::{is_valid_quality, QUALITY_TOLERANCE, SCALE},
    transaction::TxPublicInputs,
};
use log::{debug, trace};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Injected zk-SNARK verifier. Consensus only needs the boolean
/// outcome; the proving system behind it is not this crate's concern.
pub trait ProofVerifier: Send + Sync {
    /// Transaction-validity family
    fn verify_transaction(&self, proof: &[u8], inputs: &TxPublicInputs) -> bool;

    /// Gradient family
    fn verify_gradient(&self, proof: &[u8], inputs: &GradientPublicInputs) -> bool;
}

/// Verifier that accepts everything. Devnet and tests only.
#[derive(Debug, Default, Clone)]
pub struct AcceptAllVerifier;

impl ProofVerifier for AcceptAllVerifier {
    fn verify_transaction(&self, _proof: &[u8], _inputs: &TxPublicInputs) -> bool {
        true
    }

    fn verify_gradient(&self, _proof: &[u8], _inputs: &GradientPublicInputs) -> bool {
        true
    }
}

pub struct PoUWValidator<V: ProofVerifier, R: VrfSource> {
    params: Arc<ChainParams>,
    verifier: Arc<V>,
    vrf: Arc<R>,
    // Last W gradient hashes per miner, the diversity window
    recent_gradients: HashMap<Address, VecDeque<Hash>>,
}

impl<V: ProofVerifier, R: VrfSource> PoUWValidator<V, R> {
    pub fn new(params: Arc<ChainParams>, verifier: Arc<V>, vrf: Arc<R>) -> Self {
        Self {
            params,
            verifier,
            vrf,
            recent_gradients: HashMap::new(),
        }
    }

    pub fn verifier(&self) -> &V {
        &self.verifier
    }

    /// Validate a block's useful-work claim against its task.
    /// Returns the first failure.
    pub fn validate(
        &self,
        header: &BlockHeader,
        claim: Option<&GradientClaim>,
        task: &Task,
        token: &CancellationToken,
    ) -> Result<(), BlockchainError> {
        // 1. Quality bounds: 0 < q <= 1
        if !is_valid_quality(header.quality) {
            return Err(BlockchainError::PoUWInvalid(PoUWFailure::QualityOutOfBounds));
        }

        // 2. Difficulty: the header hash, big-endian, must be under the target
        let meets_target = check_difficulty(&header.hash(), &header.difficulty)
            .map_err(|_| BlockchainError::StructurallyInvalid("zero difficulty target"))?;
        if !meets_target {
            return Err(BlockchainError::DifficultyUnmet);
        }

        let Some(claim) = claim else {
            // Proof-only block: nothing further to check here, the
            // proof blob was bound into the header hash
            return Ok(());
        };

        if token.is_cancelled() {
            return Err(BlockchainError::Cancelled);
        }

        // The carried claim must be the one the header committed to
        if claim.hash() != header.pouw_result {
            return Err(BlockchainError::PoUWInvalid(PoUWFailure::ProofRejected));
        }
        if claim.quality != header.quality {
            return Err(BlockchainError::PoUWInvalid(PoUWFailure::QualityOutOfBounds));
        }

        // 3. Improvement Gate: strict loss reduction, and the claimed
        // quality matches the losses within the consensus tolerance
        let expected = claim
            .expected_quality()
            .ok_or(BlockchainError::PoUWInvalid(PoUWFailure::ImprovementGate))?;
        if claim.quality.abs_diff(expected) > QUALITY_TOLERANCE {
            return Err(BlockchainError::PoUWInvalid(PoUWFailure::ImprovementGate));
        }

        // 4. Gradient proof verification (CPU-bound, injected)
        if !self
            .verifier
            .verify_gradient(&header.pouw_proof, &claim.public_inputs())
        {
            return Err(BlockchainError::PoUWInvalid(PoUWFailure::ProofRejected));
        }

        if token.is_cancelled() {
            return Err(BlockchainError::Cancelled);
        }

        // 5. Verification subset: the claimed indices must be exactly
        // the deterministic selection for this iteration
        let expected_indices =
            self.select_verification_subset(&claim.prior_vrf_seed, claim.iteration, task.batch_size());
        if claim.verified_indices != expected_indices {
            debug!(
                "subset mismatch for task {}: {} claimed, {} expected",
                task.id,
                claim.verified_indices.len(),
                expected_indices.len()
            );
            return Err(BlockchainError::PoUWInvalid(PoUWFailure::SubsetMismatch));
        }

        // 6. Diversity: near-identical gradients from the same miner are
        // fraudulent useful-work
        self.check_diversity(&header.miner, &claim.gradient_hash)?;

        Ok(())
    }

    /// Deterministic selection of ceil(fraction * batch_size) unique
    /// batch indices from seed = H(prior_vrf_seed || iteration).
    /// Returned sorted, the canonical order.
    pub fn select_verification_subset(
        &self,
        prior_vrf_seed: &Hash,
        iteration: u64,
        batch_size: u64,
    ) -> Vec<u64> {
        if batch_size == 0 {
            return Vec::new();
        }

        let mut seed_bytes = Vec::with_capacity(40);
        seed_bytes.extend(prior_vrf_seed.as_bytes());
        seed_bytes.extend(iteration.to_be_bytes());
        let seed = hash(&seed_bytes);

        let count = (self.params.subset_fraction * batch_size).div_ceil(SCALE);
        let count = count.clamp(1, batch_size) as usize;

        let mut indices = Vec::with_capacity(count);
        let mut draw: u64 = 0;
        while indices.len() < count {
            let derived = self.vrf.derive(&seed, &draw.to_be_bytes());
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&derived.as_bytes()[..8]);
            let index = u64::from_be_bytes(raw) % batch_size;
            if !indices.contains(&index) {
                indices.push(index);
            }
            draw += 1;
        }

        indices.sort_unstable();
        indices
    }

    fn check_diversity(
        &self,
        miner: &Address,
        gradient_hash: &Hash,
    ) -> Result<(), BlockchainError> {
        let Some(recent) = self.recent_gradients.get(miner) else {
            return Ok(());
        };

        for previous in recent {
            // Similarity from the bit-level hamming distance:
            // identical hashes score 1.0, unrelated ones around 0.5
            let distance = gradient_hash.hamming_distance(previous) as u64;
            let similarity = (256 - distance) * SCALE / 256;
            if similarity > self.params.diversity_threshold {
                debug!(
                    "gradient similarity {} over threshold {} for miner {}",
                    similarity, self.params.diversity_threshold, miner
                );
                return Err(BlockchainError::PoUWInvalid(PoUWFailure::DiversityViolation));
            }
        }
        Ok(())
    }

    /// Remember an accepted gradient for the diversity window
    pub fn record_gradient(&mut self, miner: &Address, gradient_hash: Hash) {
        trace!("record gradient {} for {}", gradient_hash, miner);
        let window = self.params.diversity_window;
        let recent = self.recent_gradients.entry(miner.clone()).or_default();
        recent.push_back(gradient_hash);
        while recent.len() > window {
            recent.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vrf::Blake3Vrf;
    use gradia_common::score::REPUTATION_INITIAL;
    use indexmap::IndexSet;
    use primitive_types::U256;

    struct RejectAllVerifier;

    impl ProofVerifier for RejectAllVerifier {
        fn verify_transaction(&self, _: &[u8], _: &TxPublicInputs) -> bool {
            false
        }
        fn verify_gradient(&self, _: &[u8], _: &GradientPublicInputs) -> bool {
            false
        }
    }

    fn validator() -> PoUWValidator<AcceptAllVerifier, Blake3Vrf> {
        PoUWValidator::new(
            Arc::new(ChainParams::default()),
            Arc::new(AcceptAllVerifier),
            Arc::new(Blake3Vrf),
        )
    }

    fn task() -> Task {
        Task {
            id: hash(b"task"),
            model_id: hash(b"model"),
            dataset_id: hash(b"data"),
            batch_start: 0,
            batch_end: 1_000,
            weights_id: hash(b"weights"),
            learning_rate: 10,
            difficulty: U256::MAX,
            reward: 1,
            status: gradia_common::pouw::TaskStatus::Pending,
        }
    }

    fn claim_for(validator: &PoUWValidator<AcceptAllVerifier, Blake3Vrf>, task: &Task) -> GradientClaim {
        let prior_vrf_seed = Hash::zero();
        let iteration = 3;
        let verified_indices =
            validator.select_verification_subset(&prior_vrf_seed, iteration, task.batch_size());
        GradientClaim {
            weights_before: hash(b"w0"),
            weights_after: hash(b"w1"),
            gradient_hash: hash(b"gradient"),
            batch_commitment: hash(b"batch"),
            loss_before: 500_000,
            loss_after: 450_000,
            quality: 1_000,
            prior_vrf_seed,
            iteration,
            verified_indices,
        }
    }

    fn header_for(claim: &GradientClaim, task: &Task) -> BlockHeader {
        BlockHeader::new(
            IndexSet::from([Hash::zero()]),
            Hash::zero(),
            Hash::zero(),
            claim.hash(),
            vec![0u8; 16],
            task.id.clone(),
            claim.quality,
            Address::zero(),
            REPUTATION_INITIAL,
            U256::MAX,
            1_000,
            1,
        )
    }

    #[test]
    fn test_improvement_gate_scenario() {
        let validator = validator();
        let task = task();
        let token = CancellationToken::new();

        // loss 0.5 -> 0.45 gives q = 0.1, accepted
        let claim = claim_for(&validator, &task);
        let header = header_for(&claim, &task);
        validator
            .validate(&header, Some(&claim), &task, &token)
            .unwrap();

        // loss increases: improvement gate fails
        let mut regressed = claim.clone();
        regressed.loss_after = 550_000;
        let header = header_for(&regressed, &task);
        let err = validator
            .validate(&header, Some(&regressed), &task, &token)
            .unwrap_err();
        assert!(matches!(
            err,
            BlockchainError::PoUWInvalid(PoUWFailure::ImprovementGate)
        ));

        // q = 1.1 is out of bounds
        let mut inflated = claim.clone();
        inflated.quality = 11_000;
        let header = header_for(&inflated, &task);
        let err = validator
            .validate(&header, Some(&inflated), &task, &token)
            .unwrap_err();
        assert!(matches!(
            err,
            BlockchainError::PoUWInvalid(PoUWFailure::QualityOutOfBounds)
        ));
    }

    #[test]
    fn test_claimed_quality_must_match_losses() {
        let validator = validator();
        let task = task();
        let mut claim = claim_for(&validator, &task);
        // Losses imply q = 0.1 but the miner claims 0.2
        claim.quality = 2_000;
        let header = header_for(&claim, &task);
        let err = validator
            .validate(&header, Some(&claim), &task, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(
            err,
            BlockchainError::PoUWInvalid(PoUWFailure::ImprovementGate)
        ));
    }

    #[test]
    fn test_proof_rejection() {
        let validator = PoUWValidator::new(
            Arc::new(ChainParams::default()),
            Arc::new(RejectAllVerifier),
            Arc::new(Blake3Vrf),
        );
        let task = task();
        let accepting = self::validator();
        let claim = claim_for(&accepting, &task);
        let header = header_for(&claim, &task);
        let err = validator
            .validate(&header, Some(&claim), &task, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(
            err,
            BlockchainError::PoUWInvalid(PoUWFailure::ProofRejected)
        ));
    }

    #[test]
    fn test_subset_selection_is_deterministic_and_unique() {
        let validator = validator();
        let seed = hash(b"seed");

        let a = validator.select_verification_subset(&seed, 5, 1_000);
        let b = validator.select_verification_subset(&seed, 5, 1_000);
        assert_eq!(a, b);

        // 1% of 1000, ceiled
        assert_eq!(a.len(), 10);
        let mut deduped = a.clone();
        deduped.dedup();
        assert_eq!(a, deduped, "indices are unique and sorted");
        assert!(a.iter().all(|i| *i < 1_000));

        // Different iteration, different subset
        let c = validator.select_verification_subset(&seed, 6, 1_000);
        assert_ne!(a, c);
    }

    #[test]
    fn test_subset_mismatch_rejected() {
        let validator = validator();
        let task = task();
        let mut claim = claim_for(&validator, &task);
        claim.verified_indices.pop();
        let header = header_for(&claim, &task);
        let err = validator
            .validate(&header, Some(&claim), &task, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(
            err,
            BlockchainError::PoUWInvalid(PoUWFailure::SubsetMismatch)
        ));
    }

    #[test]
    fn test_diversity_violation() {
        let mut validator = validator();
        let task = task();
        let claim = claim_for(&validator, &task);
        let header = header_for(&claim, &task);
        let token = CancellationToken::new();

        validator
            .validate(&header, Some(&claim), &task, &token)
            .unwrap();
        validator.record_gradient(&header.miner, claim.gradient_hash.clone());

        // Resubmitting the exact same gradient is fraudulent
        let err = validator
            .validate(&header, Some(&claim), &task, &token)
            .unwrap_err();
        assert!(matches!(
            err,
            BlockchainError::PoUWInvalid(PoUWFailure::DiversityViolation)
        ));

        // A different miner is unaffected
        let mut other = header.clone();
        other.miner = Address::from_public_key(&[9u8; 32]);
        validator
            .validate(&other, Some(&claim), &task, &token)
            .unwrap();
    }

    #[test]
    fn test_cancellation_propagates() {
        let validator = validator();
        let task = task();
        let claim = claim_for(&validator, &task);
        let header = header_for(&claim, &task);
        let token = CancellationToken::new();
        token.cancel();
        let err = validator
            .validate(&header, Some(&claim), &task, &token)
            .unwrap_err();
        assert!(matches!(err, BlockchainError::Cancelled));
    }
}
