use super::{calculate_merkle_root, BlockHeader};
use crate::{config::MAX_BLOCK_TXS, crypto::Hash, pouw::GradientClaim, transaction::Transaction};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Error as FmtError, Formatter};
use std::sync::Arc;

// A full block: header, the carried gradient claim (loss values and
// commitments backing the PoUW result hash), and the transaction list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Block {
    header: BlockHeader,
    /// Loss values and gradient commitments backing `header.pouw_result`.
    /// Optional: a block may carry only the proof blob.
    pouw_claim: Option<GradientClaim>,
    transactions: Vec<Arc<Transaction>>,
}

impl Block {
    pub fn new(
        header: BlockHeader,
        pouw_claim: Option<GradientClaim>,
        transactions: Vec<Arc<Transaction>>,
    ) -> Self {
        Self {
            header,
            pouw_claim,
            transactions,
        }
    }

    pub fn get_header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn get_header_mut(&mut self) -> &mut BlockHeader {
        &mut self.header
    }

    pub fn get_pouw_claim(&self) -> Option<&GradientClaim> {
        self.pouw_claim.as_ref()
    }

    pub fn get_transactions(&self) -> &[Arc<Transaction>] {
        &self.transactions
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Structural self-consistency: transaction count bound and
    /// tx_root matching the merkle root of the body
    pub fn is_self_consistent(&self) -> bool {
        self.transactions.len() <= MAX_BLOCK_TXS
            && calculate_merkle_root(&self.transactions) == self.header.tx_root
    }
}

impl Display for Block {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        write!(
            f,
            "Block[hash: {}, height: {}, txs: {}]",
            self.hash(),
            self.header.height,
            self.transactions.len()
        )
    }
}
