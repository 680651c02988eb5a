use crate::crypto::{hash, Hash, HASH_SIZE};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::{Display, Error as FmtError, Formatter};

// A shielded transaction. Notes are never revealed: spends are proven
// by nullifiers, outputs are hiding commitments, and the zk proof binds
// both to a past commitment-tree root (the anchor).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u8,
    /// Spent note identifiers, non-empty and unique within the transaction
    pub nullifiers: Vec<Hash>,
    /// Output note commitments, in order
    pub commitments: Vec<Hash>,
    /// zk-SNARK proof blob, opaque to consensus
    #[serde(with = "hex")]
    pub proof: Vec<u8>,
    /// Commitment-tree root this transaction proves against
    pub anchor: Hash,
    /// Selective-disclosure flag bitfield
    pub disclosure_flags: u32,
    /// Disclosure blobs, one per raised flag
    pub disclosures: Vec<Vec<u8>>,
    pub fee: u64,
    #[serde(with = "hex")]
    pub memo: Vec<u8>,
}

// Public inputs the transaction-validity proof is verified against
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxPublicInputs<'a> {
    pub anchor: &'a Hash,
    pub nullifiers: &'a [Hash],
    pub commitments: &'a [Hash],
    pub fee: u64,
    pub disclosure_flags: u32,
}

impl Transaction {
    pub fn new(
        nullifiers: Vec<Hash>,
        commitments: Vec<Hash>,
        proof: Vec<u8>,
        anchor: Hash,
        fee: u64,
    ) -> Self {
        Self {
            version: crate::config::TX_VERSION,
            nullifiers,
            commitments,
            proof,
            anchor,
            disclosure_flags: 0,
            disclosures: Vec::new(),
            fee,
            memo: Vec::new(),
        }
    }

    // Transaction id: blake3 over the canonical big-endian assembly of
    // every field. Never serde, the byte layout is consensus.
    pub fn hash(&self) -> Hash {
        let mut bytes = Vec::with_capacity(self.estimated_size());
        bytes.push(self.version);
        bytes.push(self.nullifiers.len() as u8);
        for nullifier in &self.nullifiers {
            bytes.extend(nullifier.as_bytes());
        }
        bytes.push(self.commitments.len() as u8);
        for commitment in &self.commitments {
            bytes.extend(commitment.as_bytes());
        }
        bytes.extend((self.proof.len() as u32).to_be_bytes());
        bytes.extend(&self.proof);
        bytes.extend(self.anchor.as_bytes());
        bytes.extend(self.disclosure_flags.to_be_bytes());
        bytes.push(self.disclosures.len() as u8);
        for disclosure in &self.disclosures {
            bytes.extend((disclosure.len() as u32).to_be_bytes());
            bytes.extend(disclosure);
        }
        bytes.extend(self.fee.to_be_bytes());
        bytes.extend((self.memo.len() as u32).to_be_bytes());
        bytes.extend(&self.memo);
        hash(&bytes)
    }

    /// Check the intra-transaction invariants: at least one nullifier,
    /// and no nullifier listed twice
    pub fn has_valid_nullifiers(&self) -> bool {
        if self.nullifiers.is_empty() {
            return false;
        }
        let mut seen = HashSet::with_capacity(self.nullifiers.len());
        self.nullifiers.iter().all(|n| seen.insert(n))
    }

    /// Estimated serialized size in bytes, the denominator of the fee rate
    pub fn estimated_size(&self) -> usize {
        let mut size = 1 + 2 + 4 + 4 + 1 + 8 + 4; // version, counts, flags, fee
        size += (self.nullifiers.len() + self.commitments.len() + 1) * HASH_SIZE;
        size += self.proof.len();
        size += self.disclosures.iter().map(|d| 4 + d.len()).sum::<usize>();
        size += self.memo.len();
        size
    }

    /// Public inputs for the injected proof verifier
    pub fn public_inputs(&self) -> TxPublicInputs<'_> {
        TxPublicInputs {
            anchor: &self.anchor,
            nullifiers: &self.nullifiers,
            commitments: &self.commitments,
            fee: self.fee,
            disclosure_flags: self.disclosure_flags,
        }
    }
}

impl Display for Transaction {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(
            f,
            "Transaction[hash: {}, nullifiers: {}, outputs: {}, fee: {}, anchor: {}]",
            self.hash(),
            self.nullifiers.len(),
            self.commitments.len(),
            self.fee,
            self.anchor
        )
    }
}
