use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::{
    engine::{TradeEngine, TradePlan},
    execution::settlement::{DryRunSettlement, DryRunSigner, IntentSigner, SettlementClient},
    pool::registry::lock_gates,
    types::{
        EngineError, ReceiptStatus, Result, SignedIntent, Timestamp, TradeEvent, TradeIntent, TradeRequest,
        TradeResult, TxReceipt, Wad,
    },
    utils::config::{ExecutionConfig, SettlementMode},
};

/// One request with its slippage and expiry bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeOrder {
    pub request: TradeRequest,
    pub min_amount_out: Wad,
    pub deadline: Timestamp,
}

impl TradeOrder {
    pub fn new(request: TradeRequest, min_amount_out: Wad, deadline: Timestamp) -> Self {
        Self {
            request,
            min_amount_out,
            deadline,
        }
    }
}

/// Counters since the executor was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub submitted: u64,
    pub settled: u64,
    pub reverted: u64,
    pub rejected: u64,
    pub retries: u64,
    pub rollbacks: u64,
}

impl ExecutionStats {
    pub fn success_rate(&self) -> f64 {
        if self.submitted == 0 {
            return 0.0;
        }
        self.settled as f64 / self.submitted as f64
    }
}

#[derive(Default)]
struct StatCounters {
    submitted: AtomicU64,
    settled: AtomicU64,
    reverted: AtomicU64,
    rejected: AtomicU64,
    retries: AtomicU64,
    rollbacks: AtomicU64,
}

impl StatCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ExecutionStats {
        ExecutionStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            settled: self.settled.load(Ordering::Relaxed),
            reverted: self.reverted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
        }
    }
}

enum Settlement {
    Confirmed(TxReceipt),
    Failed { reason: String, receipt: Option<TxReceipt> },
}

/// Commits trades that need on-chain settlement.
///
/// The pool's commit gate is held from pricing until the settlement outcome
/// is known, so no other commit can interleave. In apply-after-confirmation
/// mode the pool changes only on a successful receipt; in optimistic mode it
/// changes first and is rolled back if settlement fails.
pub struct TradeExecutor {
    engine: Arc<TradeEngine>,
    signer: Arc<dyn IntentSigner>,
    settlement: Arc<dyn SettlementClient>,
    config: ExecutionConfig,
    next_nonce: AtomicU64,
    stats: StatCounters,
}

impl TradeExecutor {
    pub fn new(
        engine: Arc<TradeEngine>,
        signer: Arc<dyn IntentSigner>,
        settlement: Arc<dyn SettlementClient>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            engine,
            signer,
            settlement,
            config,
            next_nonce: AtomicU64::new(0),
            stats: StatCounters::default(),
        }
    }

    /// Executor that settles against the in-process simulator
    pub fn dry_run(engine: Arc<TradeEngine>, config: ExecutionConfig) -> Self {
        let signer = Arc::new(DryRunSigner::new(config.signer.clone()));
        let settlement = Arc::new(DryRunSettlement::new(engine.clock().clone()));
        Self::new(engine, signer, settlement, config)
    }

    pub fn engine(&self) -> &Arc<TradeEngine> {
        &self.engine
    }

    pub fn stats(&self) -> ExecutionStats {
        self.stats.snapshot()
    }

    /// Price, settle and apply one trade.
    ///
    /// Returns a `Settled`, `Reverted` or `Rejected` result; `Err` only for
    /// fatal engine errors.
    pub async fn execute(&self, order: TradeOrder) -> Result<TradeResult> {
        let TradeOrder {
            request,
            min_amount_out,
            deadline,
        } = order;
        let trade_id = self.engine.next_trade_id();

        let handles = match self.engine.handles(&request) {
            Ok(handles) => handles,
            Err(err) => {
                StatCounters::bump(&self.stats.rejected);
                return self.engine.reject(trade_id, request, err, self.engine.now());
            }
        };

        let _gates = lock_gates(&handles).await;
        let now = self.engine.now();

        let plan = match self
            .engine
            .prepare_gated(&handles, &request, min_amount_out, deadline, now)
        {
            Ok(plan) => plan,
            Err(err) => {
                StatCounters::bump(&self.stats.rejected);
                return self.engine.reject(trade_id, request, err, now);
            }
        };
        let committed = TradeResult::committed(trade_id, &plan.quote, now);

        let snapshots = match self.config.mode {
            SettlementMode::Optimistic => {
                let before = self.engine.apply_prepared(&handles, &plan)?;
                self.engine.emit(TradeEvent::Committed(committed.clone()));
                Some(before)
            }
            SettlementMode::ApplyAfterConfirmation => None,
        };

        info!("Submitting trade #{}: {}", trade_id, request.description());
        match self.settle(trade_id, &plan, min_amount_out, deadline).await {
            Settlement::Confirmed(receipt) => {
                if snapshots.is_none() {
                    self.engine
                        .apply_prepared(&handles, &plan)
                        .inspect_err(|e| error!("Trade #{} settled but could not be applied: {}", trade_id, e))?;
                    self.engine.emit(TradeEvent::Committed(committed.clone()));
                }

                StatCounters::bump(&self.stats.settled);
                info!("Trade #{} settled in {}", trade_id, receipt.short_hash());
                let settled = committed.settled(receipt);
                self.engine.emit(TradeEvent::Settled(settled.clone()));
                Ok(settled)
            }
            Settlement::Failed { reason, receipt } => {
                if let Some(before) = &snapshots {
                    self.engine.rollback(&handles, &plan, before)?;
                    StatCounters::bump(&self.stats.rollbacks);
                }

                StatCounters::bump(&self.stats.reverted);
                warn!("Trade #{} reverted: {}", trade_id, reason);
                let reverted = committed.reverted(reason, receipt);
                self.engine.emit(TradeEvent::Reverted(reverted.clone()));
                Ok(reverted)
            }
        }
    }

    /// Execute orders concurrently; orders touching the same pool queue on its gate
    pub async fn execute_batch(&self, orders: Vec<TradeOrder>) -> Vec<Result<TradeResult>> {
        debug!("Executing batch of {} orders", orders.len());
        join_all(orders.into_iter().map(|order| self.execute(order))).await
    }

    async fn settle(&self, trade_id: u64, plan: &TradePlan, min_amount_out: Wad, deadline: Timestamp) -> Settlement {
        let intent = TradeIntent {
            trade_id,
            request: plan.quote.request.clone(),
            expected_amount_out: plan.quote.amount_out,
            min_amount_out,
            deadline,
            nonce: self.next_nonce.fetch_add(1, Ordering::Relaxed),
        };

        let signed = match self.signer.sign(intent).await {
            Ok(signed) => signed,
            Err(e) => {
                return Settlement::Failed {
                    reason: format!("signing failed: {}", e),
                    receipt: None,
                };
            }
        };

        StatCounters::bump(&self.stats.submitted);
        match self.submit_with_retry(signed).await {
            Ok(receipt) => match &receipt.status {
                ReceiptStatus::Success => Settlement::Confirmed(receipt),
                ReceiptStatus::Reverted { reason } => Settlement::Failed {
                    reason: reason.clone(),
                    receipt: Some(receipt),
                },
            },
            Err(e) => Settlement::Failed {
                reason: e.to_string(),
                receipt: None,
            },
        }
    }

    /// Resubmit the same signed intent (same nonce) on timeouts and transient errors
    async fn submit_with_retry(&self, signed: SignedIntent) -> Result<TxReceipt> {
        let attempts = self.config.max_retries.max(1);
        let trade_id = signed.intent.trade_id;
        let mut last_error = None;

        for attempt in 1..=attempts {
            match timeout(self.config.settlement_timeout(), self.settlement.submit(signed.clone())).await {
                Ok(Ok(receipt)) => return Ok(receipt),
                Ok(Err(err)) if !is_transient(&err) => return Err(err),
                Ok(Err(err)) => {
                    warn!("Settlement attempt {}/{} for trade #{} failed: {}", attempt, attempts, trade_id, err);
                    last_error = Some(err);
                }
                Err(_) => {
                    warn!("Settlement attempt {}/{} for trade #{} timed out", attempt, attempts, trade_id);
                    last_error = Some(EngineError::Settlement(format!(
                        "timed out after {}ms",
                        self.config.settlement_timeout_ms
                    )));
                }
            }

            if attempt < attempts {
                StatCounters::bump(&self.stats.retries);
                sleep(self.config.retry_delay()).await;
            }
        }

        Err(last_error.unwrap_or_else(|| EngineError::Settlement("no settlement attempt made".into())))
    }
}

fn is_transient(err: &EngineError) -> bool {
    matches!(err, EngineError::Settlement(_) | EngineError::Io(_))
}
