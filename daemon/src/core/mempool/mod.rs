// Mempool.
//
// Transactions are ordered by fee rate (fee per estimated byte,
// descending), ties broken by arrival order. Two indexes: by tx hash
// and by nullifier, so the intra-pool double-spend check is O(1).
// Admission never verifies proofs; that happens at block validation.

use crate::core::error::BlockchainError;
use gradia_common::{config::ChainParams, crypto::Hash, transaction::Transaction};
use indexmap::IndexMap;
use log::{debug, trace};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// Fee rates carry six digits of precision over integer division
const FEE_RATE_PRECISION: u128 = 1_000_000;

struct MempoolEntry {
    tx: Arc<Transaction>,
    size: usize,
    fee_rate: u128,
    /// Monotonic arrival sequence, the tie-breaker
    arrival: u64,
}

pub struct Mempool {
    params: Arc<ChainParams>,
    txs: IndexMap<Hash, MempoolEntry>,
    // nullifier -> spending tx hash
    by_nullifier: HashMap<Hash, Hash>,
    arrival_counter: u64,
}

impl Mempool {
    pub fn new(params: Arc<ChainParams>) -> Self {
        Self {
            params,
            txs: IndexMap::new(),
            by_nullifier: HashMap::new(),
            arrival_counter: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.txs.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<&Arc<Transaction>> {
        self.txs.get(hash).map(|entry| &entry.tx)
    }

    /// Whether a nullifier is already claimed by a pooled transaction
    pub fn has_nullifier(&self, nullifier: &Hash) -> bool {
        self.by_nullifier.contains_key(nullifier)
    }

    /// Admit a transaction.
    ///
    /// Rejects on: fee under the minimum, malformed nullifier set, a
    /// nullifier already claimed in the pool, or a full pool whose
    /// cheapest entry the incoming fee does not strictly beat.
    pub fn insert(&mut self, tx: Arc<Transaction>) -> Result<(), BlockchainError> {
        if tx.fee < self.params.min_fee {
            return Err(BlockchainError::FeeTooLow {
                fee: tx.fee,
                min: self.params.min_fee,
            });
        }
        if !tx.has_valid_nullifiers() {
            return Err(BlockchainError::StructurallyInvalid(
                "empty or duplicated nullifiers",
            ));
        }

        let hash = tx.hash();
        if self.txs.contains_key(&hash) {
            return Err(BlockchainError::Duplicate(hash));
        }
        for nullifier in &tx.nullifiers {
            if let Some(existing) = self.by_nullifier.get(nullifier) {
                trace!("nullifier {} already claimed by {}", nullifier, existing);
                return Err(BlockchainError::NullifierSpent(nullifier.clone()));
            }
        }

        if self.txs.len() >= self.params.mempool_capacity {
            self.evict_for(&tx)?;
        }

        let size = tx.estimated_size();
        let entry = MempoolEntry {
            fee_rate: fee_rate(tx.fee, size),
            size,
            arrival: self.arrival_counter,
            tx,
        };
        self.arrival_counter += 1;

        for nullifier in &entry.tx.nullifiers {
            self.by_nullifier.insert(nullifier.clone(), hash.clone());
        }
        self.txs.insert(hash, entry);
        Ok(())
    }

    // Capacity eviction: drop the lowest-fee-rate entry iff the incoming
    // fee strictly exceeds the victim's fee, otherwise refuse admission
    fn evict_for(&mut self, incoming: &Transaction) -> Result<(), BlockchainError> {
        let victim = self
            .txs
            .iter()
            .min_by(|(_, a), (_, b)| {
                a.fee_rate
                    .cmp(&b.fee_rate)
                    .then_with(|| b.arrival.cmp(&a.arrival))
            })
            .map(|(hash, _)| hash.clone())
            .ok_or(BlockchainError::PoolFull)?;

        let entry = self.txs.get(&victim).expect("victim indexed");
        if incoming.fee <= entry.tx.fee {
            return Err(BlockchainError::PoolFull);
        }

        debug!("evicting {} for a better-paying transaction", victim);
        self.remove(&victim);
        Ok(())
    }

    fn remove(&mut self, hash: &Hash) -> Option<Arc<Transaction>> {
        let entry = self.txs.shift_remove(hash)?;
        for nullifier in &entry.tx.nullifiers {
            self.by_nullifier.remove(nullifier);
        }
        Some(entry.tx)
    }

    /// Select transactions for a block template, best fee rate first,
    /// respecting the count cap, the size cap, and nullifier
    /// disjointness within the selection.
    pub fn select(
        &self,
        max_count: usize,
        max_size: usize,
        token: &CancellationToken,
    ) -> Result<Vec<Arc<Transaction>>, BlockchainError> {
        let mut order: Vec<&MempoolEntry> = self.txs.values().collect();
        order.sort_by(|a, b| {
            b.fee_rate
                .cmp(&a.fee_rate)
                .then_with(|| a.arrival.cmp(&b.arrival))
        });

        let mut selected = Vec::new();
        let mut selected_nullifiers: HashMap<&Hash, ()> = HashMap::new();
        let mut total_size = 0usize;

        for entry in order {
            if token.is_cancelled() {
                return Err(BlockchainError::Cancelled);
            }
            if selected.len() == max_count {
                break;
            }
            if total_size + entry.size > max_size {
                continue;
            }
            // Intra-pool uniqueness makes collisions impossible here,
            // but the selection re-checks: the invariant is cheap
            if entry
                .tx
                .nullifiers
                .iter()
                .any(|n| selected_nullifiers.contains_key(n))
            {
                continue;
            }
            for nullifier in &entry.tx.nullifiers {
                selected_nullifiers.insert(nullifier, ());
            }
            total_size += entry.size;
            selected.push(entry.tx.clone());
        }

        Ok(selected)
    }

    /// Confirmation hook: a block reached the main chain. Drop its
    /// transactions and any pooled entry sharing a nullifier with them.
    pub fn on_block_confirmed(&mut self, txs: &[Arc<Transaction>]) {
        for tx in txs {
            let hash = tx.hash();
            self.remove(&hash);
            for nullifier in &tx.nullifiers {
                if let Some(conflicting) = self.by_nullifier.get(nullifier).cloned() {
                    debug!(
                        "dropping {} conflicting with confirmed nullifier {}",
                        conflicting, nullifier
                    );
                    self.remove(&conflicting);
                }
            }
        }
    }

    /// All pooled transactions sharing at least one nullifier with `tx`
    pub fn conflicts_of(&self, tx: &Transaction) -> Vec<Hash> {
        tx.nullifiers
            .iter()
            .filter_map(|n| self.by_nullifier.get(n).cloned())
            .collect()
    }
}

#[inline]
fn fee_rate(fee: u64, size: usize) -> u128 {
    fee as u128 * FEE_RATE_PRECISION / size.max(1) as u128
}

#[cfg(test)]
mod tests {
    use super::*;
    use gradia_common::crypto::hash;

    fn params_with_capacity(capacity: usize) -> Arc<ChainParams> {
        Arc::new(ChainParams {
            mempool_capacity: capacity,
            ..ChainParams::default()
        })
    }

    fn tx(seed: u8, fee: u64) -> Arc<Transaction> {
        Arc::new(Transaction::new(
            vec![hash(&[seed])],
            vec![hash(&[seed, 0xFF])],
            vec![0u8; 64],
            Hash::zero(),
            fee,
        ))
    }

    #[test]
    fn test_fee_floor() {
        let mut pool = Mempool::new(params_with_capacity(10));
        let cheap = Transaction::new(vec![hash(b"n")], vec![], vec![], Hash::zero(), 0);
        let err = pool.insert(Arc::new(cheap)).unwrap_err();
        assert!(matches!(err, BlockchainError::FeeTooLow { .. }));
    }

    #[test]
    fn test_intra_pool_double_spend() {
        let mut pool = Mempool::new(params_with_capacity(10));
        pool.insert(tx(1, 100)).unwrap();

        // Another tx spending the same note is refused
        let conflict = Arc::new(Transaction::new(
            vec![hash(&[1u8])],
            vec![hash(b"other output")],
            vec![],
            Hash::zero(),
            500,
        ));
        let err = pool.insert(conflict).unwrap_err();
        assert!(matches!(err, BlockchainError::NullifierSpent(_)));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_nullifier_disjointness_invariant() {
        let mut pool = Mempool::new(params_with_capacity(100));
        for seed in 0..20u8 {
            pool.insert(tx(seed, 100 + seed as u64)).unwrap();
        }

        // Pairwise disjoint nullifier sets across the pool
        let mut seen = HashMap::new();
        for (_, entry) in pool.txs.iter() {
            for n in &entry.tx.nullifiers {
                assert!(seen.insert(n.clone(), ()).is_none());
            }
        }
    }

    #[test]
    fn test_eviction_requires_strictly_higher_fee() {
        let mut pool = Mempool::new(params_with_capacity(2));
        pool.insert(tx(1, 100)).unwrap();
        pool.insert(tx(2, 200)).unwrap();

        // Equal to the victim's fee: rejected
        let err = pool.insert(tx(3, 100)).unwrap_err();
        assert!(matches!(err, BlockchainError::PoolFull));
        assert!(pool.contains(&tx(1, 100).hash()));

        // Strictly higher: the cheapest entry goes
        pool.insert(tx(4, 150)).unwrap();
        assert_eq!(pool.len(), 2);
        assert!(!pool.contains(&tx(1, 100).hash()));
        assert!(pool.contains(&tx(4, 150).hash()));
    }

    #[test]
    fn test_selection_respects_caps_and_priority() {
        let mut pool = Mempool::new(params_with_capacity(100));
        pool.insert(tx(1, 50)).unwrap();
        pool.insert(tx(2, 500)).unwrap();
        pool.insert(tx(3, 200)).unwrap();

        let token = CancellationToken::new();
        let selected = pool.select(2, usize::MAX, &token).unwrap();
        assert_eq!(selected.len(), 2);
        // Highest fee rate first (all the same size here)
        assert_eq!(selected[0].fee, 500);
        assert_eq!(selected[1].fee, 200);

        // Size cap of one transaction
        let one_size = tx(1, 50).estimated_size();
        let selected = pool.select(10, one_size, &token).unwrap();
        assert_eq!(selected.len(), 1);
        let total: usize = selected.iter().map(|t| t.estimated_size()).sum();
        assert!(total <= one_size);
    }

    #[test]
    fn test_selection_cancellation() {
        let mut pool = Mempool::new(params_with_capacity(10));
        pool.insert(tx(1, 100)).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            pool.select(10, usize::MAX, &token),
            Err(BlockchainError::Cancelled)
        ));
    }

    #[test]
    fn test_confirmation_hook_purges_conflicts() {
        let mut pool = Mempool::new(params_with_capacity(10));
        let confirmed = tx(1, 100);
        let unrelated = tx(2, 100);
        pool.insert(confirmed.clone()).unwrap();
        pool.insert(unrelated.clone()).unwrap();

        // A conflicting spend that was never pooled confirms in a block
        let external = Arc::new(Transaction::new(
            vec![hash(&[1u8]), hash(b"other note")],
            vec![],
            vec![],
            Hash::zero(),
            999,
        ));
        pool.on_block_confirmed(&[external]);

        assert!(!pool.contains(&confirmed.hash()), "conflict evicted");
        assert!(pool.contains(&unrelated.hash()));
        assert!(!pool.has_nullifier(&hash(&[1u8])));
    }

    proptest::proptest! {
        #[test]
        fn prop_selection_caps_and_disjointness(
            fees in proptest::collection::vec(1u64..10_000, 1..50),
            max_count in 1usize..20,
            max_size in 100usize..10_000,
        ) {
            let mut pool = Mempool::new(params_with_capacity(100));
            for (i, fee) in fees.iter().enumerate() {
                let _ = pool.insert(tx(i as u8, *fee));
            }

            let selected = pool
                .select(max_count, max_size, &CancellationToken::new())
                .unwrap();
            proptest::prop_assert!(selected.len() <= max_count);

            let total: usize = selected.iter().map(|t| t.estimated_size()).sum();
            proptest::prop_assert!(total <= max_size);

            let mut seen = HashMap::new();
            for tx in &selected {
                for nullifier in &tx.nullifiers {
                    proptest::prop_assert!(seen.insert(nullifier.clone(), ()).is_none());
                }
            }
        }
    }

    #[test]
    fn test_arrival_order_breaks_ties() {
        let mut pool = Mempool::new(params_with_capacity(10));
        let first = tx(1, 100);
        let second = tx(2, 100);
        pool.insert(first.clone()).unwrap();
        pool.insert(second.clone()).unwrap();

        let selected = pool
            .select(10, usize::MAX, &CancellationToken::new())
            .unwrap();
        assert_eq!(selected[0].hash(), first.hash());
        assert_eq!(selected[1].hash(), second.hash());
    }
}
