// Append-only note commitment tree.
//
// A perfect binary tree of fixed depth 32 over the chain's note
// commitments. Only the frontier (the rightmost filled node at each
// level) is needed to append, so an append costs D hashes and D node
// writes. Empty subtrees hash to precomputed constants.
//
// The tree keeps a bounded ring of recent roots: a transaction may
// anchor to any root still inside the ring, older anchors are rejected.

use crate::core::{error::BlockchainError, storage::CommitmentTreeProvider};
use gradia_common::{
    config::COMMITMENT_TREE_DEPTH,
    crypto::{hash_pair, Hash},
};
use log::trace;
use std::collections::VecDeque;

pub const TREE_DEPTH: usize = COMMITMENT_TREE_DEPTH;

/// Maximum number of leaves: 2^32
pub const MAX_LEAVES: u64 = 1u64 << TREE_DEPTH;

/// Witness path for one leaf: sibling hashes from the leaf up, and
/// direction bits. Bit i is set iff the leaf's ancestor at level i is a
/// right child.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerklePath {
    pub siblings: Vec<Hash>,
    pub bits: Vec<bool>,
}

pub struct CommitmentTree {
    /// EMPTY_ROOTS[i] is the root of an empty subtree of height i
    empty_roots: Vec<Hash>,
    /// Rightmost filled node per level, the only state appends touch
    frontier: Vec<Hash>,
    size: u64,
    root: Hash,
    /// Recent roots, oldest first. Capacity is window + 1: the current
    /// root plus the previous `window` ones remain valid anchors.
    recent_roots: VecDeque<Hash>,
    window: usize,
}

impl CommitmentTree {
    /// Load the tree state from storage, or start empty.
    /// The frontier is rebuilt from the persisted nodes.
    pub async fn load<P: CommitmentTreeProvider>(
        provider: &P,
        window: usize,
    ) -> Result<Self, BlockchainError> {
        let empty_roots = build_empty_roots();
        let size = provider.get_tree_size().await?;
        let root = match provider.get_tree_root().await? {
            Some(root) => root,
            None => empty_roots[TREE_DEPTH].clone(),
        };

        let mut frontier = vec![Hash::zero(); TREE_DEPTH];
        for (level, slot) in frontier.iter_mut().enumerate() {
            let filled = size >> level;
            if filled & 1 == 1 {
                *slot = provider
                    .get_tree_node(level as u8, filled - 1)
                    .await?
                    .ok_or_else(|| {
                        BlockchainError::StorageFailure(format!(
                            "missing frontier node at level {} index {}",
                            level,
                            filled - 1
                        ))
                    })?;
            }
        }

        let mut recent_roots = VecDeque::with_capacity(window + 1);
        recent_roots.push_back(root.clone());

        Ok(Self {
            empty_roots,
            frontier,
            size,
            root,
            recent_roots,
            window,
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn root(&self) -> &Hash {
        &self.root
    }

    /// Whether a root is still a valid transaction anchor
    pub fn is_recent_root(&self, root: &Hash) -> bool {
        self.recent_roots.contains(root)
    }

    /// Append one commitment, returning its leaf position.
    /// The new root immediately enters the recent-anchor ring.
    pub async fn append<P: CommitmentTreeProvider>(
        &mut self,
        provider: &mut P,
        commitment: Hash,
    ) -> Result<u64, BlockchainError> {
        let position = self.append_leaf(provider, commitment).await?;
        self.rotate_recent_root();
        Ok(position)
    }

    /// Append a block's worth of commitments as one unit: the ring
    /// advances once per batch so the anchor window is counted in
    /// blocks, not in notes.
    pub async fn append_batch<P: CommitmentTreeProvider>(
        &mut self,
        provider: &mut P,
        commitments: &[Hash],
    ) -> Result<(), BlockchainError> {
        if commitments.is_empty() {
            return Ok(());
        }
        if self.size + commitments.len() as u64 > MAX_LEAVES {
            return Err(BlockchainError::StructurallyInvalid(
                "commitment tree is full",
            ));
        }
        for commitment in commitments {
            self.append_leaf(provider, commitment.clone()).await?;
        }
        self.rotate_recent_root();
        Ok(())
    }

    async fn append_leaf<P: CommitmentTreeProvider>(
        &mut self,
        provider: &mut P,
        commitment: Hash,
    ) -> Result<u64, BlockchainError> {
        if self.size == MAX_LEAVES {
            return Err(BlockchainError::StructurallyInvalid(
                "commitment tree is full",
            ));
        }

        let position = self.size;
        trace!("append commitment at position {}", position);
        provider.set_tree_node(0, position, commitment.clone()).await?;

        let mut current = commitment;
        let mut index = position;
        for level in 0..TREE_DEPTH {
            if index & 1 == 0 {
                // Left child: remember it, the right sibling is still empty
                self.frontier[level] = current.clone();
                current = hash_pair(&current, &self.empty_roots[level]);
            } else {
                current = hash_pair(&self.frontier[level], &current);
            }
            index >>= 1;
            provider
                .set_tree_node((level + 1) as u8, index, current.clone())
                .await?;
        }

        self.root = current;
        self.size = position + 1;
        provider.set_tree_size(self.size).await?;
        provider.set_tree_root(self.root.clone()).await?;
        Ok(position)
    }

    fn rotate_recent_root(&mut self) {
        if self.recent_roots.back() == Some(&self.root) {
            return;
        }
        self.recent_roots.push_back(self.root.clone());
        while self.recent_roots.len() > self.window + 1 {
            self.recent_roots.pop_front();
        }
    }

    /// Witness path for the leaf at `position`
    pub async fn path<P: CommitmentTreeProvider>(
        &self,
        provider: &P,
        position: u64,
    ) -> Result<MerklePath, BlockchainError> {
        if position >= self.size {
            return Err(BlockchainError::StructurallyInvalid(
                "leaf position beyond tree size",
            ));
        }

        let mut siblings = Vec::with_capacity(TREE_DEPTH);
        let mut bits = Vec::with_capacity(TREE_DEPTH);
        for level in 0..TREE_DEPTH {
            let index = position >> level;
            let sibling_index = index ^ 1;
            let sibling = provider
                .get_tree_node(level as u8, sibling_index)
                .await?
                .unwrap_or_else(|| self.empty_roots[level].clone());
            siblings.push(sibling);
            bits.push(index & 1 == 1);
        }

        Ok(MerklePath { siblings, bits })
    }

    /// Recompute the root from a leaf and its path
    pub fn verify(leaf: &Hash, path: &MerklePath, root: &Hash) -> bool {
        if path.siblings.len() != TREE_DEPTH || path.bits.len() != TREE_DEPTH {
            return false;
        }

        let mut current = leaf.clone();
        for (sibling, is_right) in path.siblings.iter().zip(path.bits.iter()) {
            current = if *is_right {
                hash_pair(sibling, &current)
            } else {
                hash_pair(&current, sibling)
            };
        }
        current == *root
    }
}

// EMPTY_ROOTS[0] is the empty leaf, EMPTY_ROOTS[i+1] = H(E[i] || E[i])
fn build_empty_roots() -> Vec<Hash> {
    let mut roots = Vec::with_capacity(TREE_DEPTH + 1);
    roots.push(Hash::zero());
    for i in 0..TREE_DEPTH {
        roots.push(hash_pair(&roots[i], &roots[i]));
    }
    roots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::MemoryStorage;
    use gradia_common::crypto::hash;

    async fn empty_tree(storage: &MemoryStorage, window: usize) -> CommitmentTree {
        CommitmentTree::load(storage, window).await.unwrap()
    }

    #[tokio::test]
    async fn test_append_path_verify_round_trip() {
        let mut storage = MemoryStorage::new();
        let mut tree = empty_tree(&storage, 100).await;

        let mut positions = Vec::new();
        for i in 0u8..5 {
            let c = hash(&[i]);
            positions.push(tree.append(&mut storage, c).await.unwrap());
        }
        assert_eq!(positions, vec![0, 1, 2, 3, 4]);

        // Every earlier leaf still verifies against the current root
        for i in 0u8..5 {
            let leaf = hash(&[i]);
            let path = tree.path(&storage, i as u64).await.unwrap();
            assert!(CommitmentTree::verify(&leaf, &path, tree.root()));
        }

        // A wrong leaf fails
        let path = tree.path(&storage, 0).await.unwrap();
        assert!(!CommitmentTree::verify(&hash(b"bogus"), &path, tree.root()));
    }

    #[tokio::test]
    async fn test_verification_survives_later_appends() {
        let mut storage = MemoryStorage::new();
        let mut tree = empty_tree(&storage, 100).await;

        let c = hash(b"first note");
        let position = tree.append(&mut storage, c.clone()).await.unwrap();

        for i in 0u8..32 {
            tree.append(&mut storage, hash(&[0xAA, i])).await.unwrap();
        }

        let path = tree.path(&storage, position).await.unwrap();
        assert!(CommitmentTree::verify(&c, &path, tree.root()));
    }

    #[tokio::test]
    async fn test_anchor_window_expiry() {
        let mut storage = MemoryStorage::new();
        let mut tree = empty_tree(&storage, 100).await;
        let anchor = tree.root().clone();
        assert!(tree.is_recent_root(&anchor));

        // 100 appends keep the anchor alive
        for i in 0u32..100 {
            tree.append(&mut storage, hash(&i.to_be_bytes())).await.unwrap();
        }
        assert!(tree.is_recent_root(&anchor));

        // The 101st pushes it out of the window
        tree.append(&mut storage, hash(b"one more")).await.unwrap();
        assert!(!tree.is_recent_root(&anchor));
        assert!(tree.is_recent_root(tree.root()));
    }

    #[tokio::test]
    async fn test_batch_rotates_window_once() {
        let mut storage = MemoryStorage::new();
        let mut tree = empty_tree(&storage, 2).await;
        let anchor = tree.root().clone();

        // One batch of many notes consumes a single window slot
        let notes: Vec<Hash> = (0u8..10).map(|i| hash(&[i])).collect();
        tree.append_batch(&mut storage, &notes).await.unwrap();
        assert!(tree.is_recent_root(&anchor));
        assert_eq!(tree.size(), 10);

        tree.append_batch(&mut storage, &[hash(b"a")]).await.unwrap();
        assert!(tree.is_recent_root(&anchor));
        tree.append_batch(&mut storage, &[hash(b"b")]).await.unwrap();
        assert!(!tree.is_recent_root(&anchor));
    }

    #[tokio::test]
    async fn test_reload_preserves_state() {
        let mut storage = MemoryStorage::new();
        let root = {
            let mut tree = empty_tree(&storage, 100).await;
            for i in 0u8..7 {
                tree.append(&mut storage, hash(&[i])).await.unwrap();
            }
            tree.root().clone()
        };

        // A fresh instance rebuilt from storage continues where we left off
        let mut reloaded = CommitmentTree::load(&storage, 100).await.unwrap();
        assert_eq!(reloaded.size(), 7);
        assert_eq!(reloaded.root(), &root);

        let position = reloaded.append(&mut storage, hash(b"next")).await.unwrap();
        assert_eq!(position, 7);
        let path = reloaded.path(&storage, 7).await.unwrap();
        assert!(CommitmentTree::verify(&hash(b"next"), &path, reloaded.root()));
    }
}
