// Spent-nullifier set.
//
// Append-only under normal operation: a nullifier goes from absent to
// present exactly once, and mark_spent is test-and-set with respect to
// membership (the caller holds the set's write lock, and the provider
// re-checks before inserting). The only removal path is the reorg
// unwind, when a spending block leaves the main chain.
//
// The set never sees note plaintext or the derivation
// H(spending key || commitment || position), only opaque hashes.

use crate::core::{error::BlockchainError, storage::NullifierProvider};
use gradia_common::crypto::Hash;
use log::trace;
use lru::LruCache;
use std::num::NonZeroUsize;

/// Entries kept in the recency cache in front of the store
const DEFAULT_CACHE_SIZE: usize = 16_384;

pub struct NullifierSet {
    // Known-spent cache. Only positive entries are cached: a miss always
    // falls through to the authoritative store.
    cache: LruCache<Hash, ()>,
}

impl Default for NullifierSet {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_SIZE)
    }
}

impl NullifierSet {
    pub fn new(cache_size: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_size.max(1)).unwrap();
        Self {
            cache: LruCache::new(capacity),
        }
    }

    pub async fn is_spent<P: NullifierProvider>(
        &self,
        provider: &P,
        nullifier: &Hash,
    ) -> Result<bool, BlockchainError> {
        if self.cache.contains(nullifier) {
            return Ok(true);
        }
        provider.has_nullifier(nullifier).await
    }

    /// Test-and-set: fails with NullifierSpent when already present
    pub async fn mark_spent<P: NullifierProvider>(
        &mut self,
        provider: &mut P,
        nullifier: Hash,
        tx_hash: Hash,
        height: u64,
    ) -> Result<(), BlockchainError> {
        trace!("mark nullifier {} spent at height {}", nullifier, height);
        provider
            .add_nullifier(nullifier.clone(), tx_hash, height)
            .await?;
        self.cache.put(nullifier, ());
        Ok(())
    }

    /// Record every spend of a block as one unit: all-or-nothing.
    /// Each entry is (nullifier, spending tx hash).
    pub async fn mark_all_spent<P: NullifierProvider>(
        &mut self,
        provider: &mut P,
        spends: &[(Hash, Hash)],
        height: u64,
    ) -> Result<(), BlockchainError> {
        // Stage: check everything before touching the store
        for (i, (nullifier, _)) in spends.iter().enumerate() {
            if provider.has_nullifier(nullifier).await? {
                return Err(BlockchainError::NullifierSpent(nullifier.clone()));
            }
            if spends[..i].iter().any(|(n, _)| n == nullifier) {
                return Err(BlockchainError::DoubleSpendIntraBlock(nullifier.clone()));
            }
        }

        // Commit: nothing below can fail the membership test
        for (nullifier, tx_hash) in spends {
            provider
                .add_nullifier(nullifier.clone(), tx_hash.clone(), height)
                .await?;
            self.cache.put(nullifier.clone(), ());
        }
        Ok(())
    }

    /// Reorg unwind: free a nullifier whose spending block went off-chain
    pub async fn unmark<P: NullifierProvider>(
        &mut self,
        provider: &mut P,
        nullifier: &Hash,
    ) -> Result<(), BlockchainError> {
        trace!("unmark nullifier {} (reorg)", nullifier);
        self.cache.pop(nullifier);
        provider.remove_nullifier(nullifier).await
    }
}
