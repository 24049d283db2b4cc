use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::{
    types::{ReceiptStatus, Result, SignedIntent, TradeIntent, TxReceipt},
    utils::clock::Clock,
};

/// Chain-side collaborator that executes signed intents
#[async_trait]
pub trait SettlementClient: Send + Sync {
    async fn submit(&self, intent: SignedIntent) -> Result<TxReceipt>;
}

/// Holds the keys; the engine never sees them
#[async_trait]
pub trait IntentSigner: Send + Sync {
    async fn sign(&self, intent: TradeIntent) -> Result<SignedIntent>;
}

/// Confirms every intent after an optional simulated latency
pub struct DryRunSettlement {
    clock: Arc<dyn Clock>,
    latency: Duration,
    block_number: AtomicU64,
}

impl DryRunSettlement {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            latency: Duration::ZERO,
            block_number: AtomicU64::new(1),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[async_trait]
impl SettlementClient for DryRunSettlement {
    async fn submit(&self, intent: SignedIntent) -> Result<TxReceipt> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let block_number = self.block_number.fetch_add(1, Ordering::Relaxed);
        let receipt = TxReceipt {
            tx_hash: format!("0x{:016x}{:016x}", intent.intent.trade_id, intent.intent.nonce),
            block_number: Some(block_number),
            status: ReceiptStatus::Success,
            confirmed_at: self.clock.now(),
        };
        debug!("Dry-run settled trade #{} in block {}", intent.intent.trade_id, block_number);
        Ok(receipt)
    }
}

/// Signs with a label instead of a key
pub struct DryRunSigner {
    signer: String,
}

impl DryRunSigner {
    pub fn new(signer: impl Into<String>) -> Self {
        Self { signer: signer.into() }
    }
}

#[async_trait]
impl IntentSigner for DryRunSigner {
    async fn sign(&self, intent: TradeIntent) -> Result<SignedIntent> {
        let payload = serde_json::to_string(&intent)?;
        Ok(SignedIntent {
            signature: format!("dry-run:{}:{}", self.signer, payload.len()),
            signer: self.signer.clone(),
            intent,
        })
    }
}
