use crate::{
    config::BLOCK_VERSION,
    crypto::{hash, Address, Hash},
    difficulty::{CumulativeScore, Difficulty},
    score::ScaledScore,
    time::TimestampSeconds,
};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Error as FmtError, Formatter};

/// Block header for the reputation-weighted PoUW DAG.
///
/// Immutable once hashed. The mining proof is the useful-work gradient
/// proof: `pouw_result` commits to the gradient claim, `quality` is the
/// normalized loss improvement, and `reputation` is the miner's EWMA
/// score at mining time. `cumulative_score` is derived by the DAG on
/// insertion and excluded from the header hash.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u8,
    /// Parent block hashes, deduplicated, in selection order.
    /// Empty only for genesis.
    pub parents: IndexSet<Hash>,
    /// Merkle root of the transaction hashes
    pub tx_root: Hash,
    /// Commitment of the chain state this block extends
    pub state_root: Hash,
    /// Hash of the gradient claim (the PoUW result)
    pub pouw_result: Hash,
    /// Gradient zk proof blob, opaque to consensus
    #[serde(with = "hex")]
    pub pouw_proof: Vec<u8>,
    /// Task this block's useful work was performed for
    pub task_id: Hash,
    /// Quality score of the useful work, in SCALE units, (0, 1]
    pub quality: ScaledScore,
    pub miner: Address,
    /// Miner reputation at mining time, in SCALE units, [0.1, 3.0]
    pub reputation: ScaledScore,
    pub difficulty: Difficulty,
    pub nonce: u64,
    pub timestamp: TimestampSeconds,
    /// 1 + max(parent heights), 0 for genesis
    pub height: u64,
    /// Derived by the DAG, never part of the header hash
    #[serde(default)]
    pub cumulative_score: CumulativeScore,
}

impl BlockHeader {
    pub fn new(
        parents: IndexSet<Hash>,
        tx_root: Hash,
        state_root: Hash,
        pouw_result: Hash,
        pouw_proof: Vec<u8>,
        task_id: Hash,
        quality: ScaledScore,
        miner: Address,
        reputation: ScaledScore,
        difficulty: Difficulty,
        timestamp: TimestampSeconds,
        height: u64,
    ) -> Self {
        Self {
            version: BLOCK_VERSION,
            parents,
            tx_root,
            state_root,
            pouw_result,
            pouw_proof,
            task_id,
            quality,
            miner,
            reputation,
            difficulty,
            nonce: 0,
            timestamp,
            height,
            cumulative_score: CumulativeScore::zero(),
        }
    }

    pub fn get_parents(&self) -> &IndexSet<Hash> {
        &self.parents
    }

    pub fn is_genesis(&self) -> bool {
        self.parents.is_empty()
    }

    // Canonical big-endian assembly of every hashed field.
    // The byte layout is consensus, serde never touches it.
    fn get_serialized_header(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(256 + self.pouw_proof.len());
        bytes.push(self.version);
        bytes.push(self.parents.len() as u8);
        for parent in &self.parents {
            bytes.extend(parent.as_bytes());
        }
        bytes.extend(self.tx_root.as_bytes());
        bytes.extend(self.state_root.as_bytes());
        bytes.extend(self.pouw_result.as_bytes());
        bytes.extend((self.pouw_proof.len() as u32).to_be_bytes());
        bytes.extend(&self.pouw_proof);
        bytes.extend(self.task_id.as_bytes());
        bytes.extend(self.quality.to_be_bytes());
        bytes.extend(self.miner.as_bytes());
        bytes.extend(self.reputation.to_be_bytes());
        bytes.extend(self.difficulty.to_big_endian());
        bytes.extend(self.nonce.to_be_bytes());
        bytes.extend(self.timestamp.to_be_bytes());
        bytes.extend(self.height.to_be_bytes());
        bytes
    }

    /// Header hash: block id, and the integer compared against the
    /// difficulty target
    pub fn hash(&self) -> Hash {
        hash(&self.get_serialized_header())
    }
}

impl Display for BlockHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        let parents: Vec<String> = self.parents.iter().map(|h| format!("{}", h)).collect();
        write!(
            f,
            "BlockHeader[height: {}, parents: [{}], miner: {}, quality: {}, timestamp: {}, nonce: {}]",
            self.height,
            parents.join(", "),
            self.miner,
            self.quality,
            self.timestamp,
            self.nonce
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::{REPUTATION_INITIAL, SCALE};
    use primitive_types::U256;

    fn dummy_header() -> BlockHeader {
        BlockHeader::new(
            IndexSet::from([Hash::zero()]),
            Hash::zero(),
            Hash::zero(),
            Hash::zero(),
            vec![],
            Hash::zero(),
            SCALE,
            Address::zero(),
            REPUTATION_INITIAL,
            U256::MAX,
            1_000,
            1,
        )
    }

    #[test]
    fn test_hash_covers_nonce() {
        let mut header = dummy_header();
        let before = header.hash();
        header.nonce = 42;
        assert_ne!(before, header.hash());
    }

    #[test]
    fn test_hash_excludes_cumulative_score() {
        let mut header = dummy_header();
        let before = header.hash();
        header.cumulative_score = U256::from(123_456u64);
        assert_eq!(before, header.hash());
    }

    #[test]
    fn test_serde_round_trip() {
        let header = dummy_header();
        let json = serde_json::to_string(&header).unwrap();
        let decoded: BlockHeader = serde_json::from_str(&json).unwrap();
        assert_eq!(header.hash(), decoded.hash());
    }
}
