use serde::{Deserialize, Serialize};

use crate::types::{Timestamp, TradeRequest, Wad};

/// Unsigned description of a committed trade handed to the signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub trade_id: u64,
    pub request: TradeRequest,
    pub expected_amount_out: Wad,
    pub min_amount_out: Wad,
    pub deadline: Timestamp,
    /// Resubmissions of the same intent reuse the nonce, so the chain
    /// executes it at most once
    pub nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedIntent {
    pub intent: TradeIntent,
    pub signer: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptStatus {
    Success,
    Reverted { reason: String },
}

/// Transaction receipt returned by the settlement layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub block_number: Option<u64>,
    pub status: ReceiptStatus,
    pub confirmed_at: Timestamp,
}

impl TxReceipt {
    pub fn is_success(&self) -> bool {
        matches!(self.status, ReceiptStatus::Success)
    }

    /// Short hash for log lines
    pub fn short_hash(&self) -> &str {
        self.tx_hash.get(..10).unwrap_or(&self.tx_hash)
    }
}
