mod commitment_tree;
mod nullifier_set;

pub use commitment_tree::{CommitmentTree, MerklePath, MAX_LEAVES, TREE_DEPTH};
pub use nullifier_set::NullifierSet;
