mod memory;
pub mod providers;

pub use memory::MemoryStorage;
pub use providers::{
    BlockProvider, CommitmentTreeProvider, NullifierInfo, NullifierProvider, ReputationProvider,
    TaskProvider,
};

use gradia_common::crypto::Hash;
use indexmap::IndexSet;

// Current chain tips: blocks without children, in insertion order
pub type Tips = IndexSet<Hash>;

/// Everything the chain persists, one narrow provider per component.
/// Components never take a `Storage` directly; each function is generic
/// over the single provider trait it needs.
pub trait Storage:
    BlockProvider
    + CommitmentTreeProvider
    + NullifierProvider
    + ReputationProvider
    + TaskProvider
    + Send
    + Sync
{
}

impl<T> Storage for T where
    T: BlockProvider
        + CommitmentTreeProvider
        + NullifierProvider
        + ReputationProvider
        + TaskProvider
        + Send
        + Sync
{
}
