//! Key identifying one compensable sub-transaction

use crate::TxId;
use serde::{Deserialize, Serialize};

/// `(global_tx_id, local_tx_id)`: at most one compensation runs per key
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompensationKey {
    /// Global transaction
    pub global_tx_id: TxId,
    /// Sub-transaction within it
    pub local_tx_id: TxId,
}

impl CompensationKey {
    /// Key for one sub-transaction
    pub fn new(global_tx_id: TxId, local_tx_id: TxId) -> Self {
        Self {
            global_tx_id,
            local_tx_id,
        }
    }

    /// True when this key belongs to the given global transaction
    pub fn belongs_to(&self, global_tx_id: &TxId) -> bool {
        &self.global_tx_id == global_tx_id
    }
}

impl std::fmt::Display for CompensationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.global_tx_id, self.local_tx_id)
    }
}
