use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{
    types::{AccountId, EngineError, PoolId, Timestamp, TradeErrorKind, TxReceipt, Wad},
    utils::math::to_percent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeKind {
    Buy,
    Sell,
    Swap,
    Deposit,
    Withdraw,
}

impl fmt::Display for TradeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TradeKind::Buy => "BUY",
            TradeKind::Sell => "SELL",
            TradeKind::Swap => "SWAP",
            TradeKind::Deposit => "DEPOSIT",
            TradeKind::Withdraw => "WITHDRAW",
        };
        write!(f, "{}", name)
    }
}

/// A user-initiated trade against one or two pools.
///
/// Buy spends ETH for the pool's base token, Sell spends base token for ETH,
/// Swap routes base token A -> ETH -> base token B through two pools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TradeRequest {
    Buy {
        pool_id: PoolId,
        eth_in: Wad,
    },
    Sell {
        pool_id: PoolId,
        token_in: Wad,
    },
    Swap {
        pool_in: PoolId,
        pool_out: PoolId,
        amount_in: Wad,
    },
    Deposit {
        pool_id: PoolId,
        account: AccountId,
        eth_amount: Wad,
        token_amount: Wad,
    },
    Withdraw {
        pool_id: PoolId,
        account: AccountId,
        lp_amount: Wad,
    },
}

impl TradeRequest {
    pub fn buy(pool_id: impl Into<PoolId>, eth_in: Wad) -> Self {
        Self::Buy { pool_id: pool_id.into(), eth_in }
    }

    pub fn sell(pool_id: impl Into<PoolId>, token_in: Wad) -> Self {
        Self::Sell { pool_id: pool_id.into(), token_in }
    }

    pub fn swap(pool_in: impl Into<PoolId>, pool_out: impl Into<PoolId>, amount_in: Wad) -> Self {
        Self::Swap {
            pool_in: pool_in.into(),
            pool_out: pool_out.into(),
            amount_in,
        }
    }

    pub fn deposit(
        pool_id: impl Into<PoolId>,
        account: impl Into<AccountId>,
        eth_amount: Wad,
        token_amount: Wad,
    ) -> Self {
        Self::Deposit {
            pool_id: pool_id.into(),
            account: account.into(),
            eth_amount,
            token_amount,
        }
    }

    pub fn withdraw(pool_id: impl Into<PoolId>, account: impl Into<AccountId>, lp_amount: Wad) -> Self {
        Self::Withdraw {
            pool_id: pool_id.into(),
            account: account.into(),
            lp_amount,
        }
    }

    pub fn kind(&self) -> TradeKind {
        match self {
            TradeRequest::Buy { .. } => TradeKind::Buy,
            TradeRequest::Sell { .. } => TradeKind::Sell,
            TradeRequest::Swap { .. } => TradeKind::Swap,
            TradeRequest::Deposit { .. } => TradeKind::Deposit,
            TradeRequest::Withdraw { .. } => TradeKind::Withdraw,
        }
    }

    /// Primary input amount (ETH for buys and deposits, LP for withdrawals)
    pub fn amount_in(&self) -> Wad {
        match self {
            TradeRequest::Buy { eth_in, .. } => *eth_in,
            TradeRequest::Sell { token_in, .. } => *token_in,
            TradeRequest::Swap { amount_in, .. } => *amount_in,
            TradeRequest::Deposit { eth_amount, .. } => *eth_amount,
            TradeRequest::Withdraw { lp_amount, .. } => *lp_amount,
        }
    }

    /// Pools touched by this request in lock order (sorted, deduplicated)
    pub fn pool_ids(&self) -> Vec<PoolId> {
        let mut ids = match self {
            TradeRequest::Buy { pool_id, .. }
            | TradeRequest::Sell { pool_id, .. }
            | TradeRequest::Deposit { pool_id, .. }
            | TradeRequest::Withdraw { pool_id, .. } => vec![pool_id.clone()],
            TradeRequest::Swap { pool_in, pool_out, .. } => vec![pool_in.clone(), pool_out.clone()],
        };
        ids.sort();
        ids.dedup();
        ids
    }

    /// Get human-readable description
    pub fn description(&self) -> String {
        match self {
            TradeRequest::Buy { pool_id, eth_in } => format!("BUY {} ETH on {}", eth_in, pool_id),
            TradeRequest::Sell { pool_id, token_in } => format!("SELL {} on {}", token_in, pool_id),
            TradeRequest::Swap { pool_in, pool_out, amount_in } => {
                format!("SWAP {} via {} → {}", amount_in, pool_in, pool_out)
            }
            TradeRequest::Deposit { pool_id, account, eth_amount, token_amount } => format!(
                "DEPOSIT {} ETH + {} into {} for {}",
                eth_amount, token_amount, pool_id, account
            ),
            TradeRequest::Withdraw { pool_id, account, lp_amount } => {
                format!("WITHDRAW {} LP from {} for {}", lp_amount, pool_id, account)
            }
        }
    }
}

/// Read-only price preview for a request.
///
/// Valid until any pool it was computed against mutates, or until `expires_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub request: TradeRequest,

    /// Output in the receiving asset (LP tokens for deposits, ETH for withdrawals)
    pub amount_out: Wad,

    /// Base token paid out by a withdrawal
    pub secondary_amount_out: Option<Wad>,

    /// Fee retained by the pool, denominated in the input asset
    pub fee: Wad,

    /// Fraction in `[0, cap]`; for swaps both legs compounded, then clamped to the cap
    pub price_impact: Decimal,

    /// Relaxed anchor used for pricing (tokens per ETH); for swaps the
    /// output tokens per input token, for liquidity operations the spot
    pub effective_price: Decimal,

    pub pool_versions: Vec<(PoolId, u64)>,
    pub quoted_at: Timestamp,
    pub expires_at: Timestamp,
}

impl Quote {
    pub fn price_impact_percent(&self) -> Decimal {
        to_percent(self.price_impact)
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        now > self.expires_at
    }

    /// A quote stays valid while none of its pools changed and it has not expired.
    pub fn is_valid_at(&self, current_versions: &[(PoolId, u64)], now: Timestamp) -> bool {
        !self.is_expired(now)
            && self.pool_versions.iter().all(|(pool_id, version)| {
                current_versions
                    .iter()
                    .any(|(id, current)| id == pool_id && current == version)
            })
    }
}

/// Lifecycle status of an executed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    /// Accepted and applied to pool state
    Committed,
    /// Refused before any state change
    Rejected,
    /// Committed and confirmed by the settlement layer
    Settled,
    /// Committed but refused by the settlement layer
    Reverted,
}

impl TradeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TradeStatus::Committed)
    }
}

/// Immutable record of one executed request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeResult {
    pub trade_id: u64,
    pub request: TradeRequest,
    pub success: bool,
    pub status: TradeStatus,
    pub amount_out: Wad,
    pub secondary_amount_out: Option<Wad>,
    pub fee: Wad,
    pub price_impact: Decimal,
    pub effective_price: Decimal,
    pub timestamp: Timestamp,
    pub error: Option<TradeErrorKind>,
    pub error_message: Option<String>,
    pub receipt: Option<TxReceipt>,
}

impl TradeResult {
    pub fn committed(trade_id: u64, quote: &Quote, timestamp: Timestamp) -> Self {
        Self {
            trade_id,
            request: quote.request.clone(),
            success: true,
            status: TradeStatus::Committed,
            amount_out: quote.amount_out,
            secondary_amount_out: quote.secondary_amount_out,
            fee: quote.fee,
            price_impact: quote.price_impact,
            effective_price: quote.effective_price,
            timestamp,
            error: None,
            error_message: None,
            receipt: None,
        }
    }

    pub fn rejected(trade_id: u64, request: TradeRequest, error: &EngineError, timestamp: Timestamp) -> Self {
        Self {
            trade_id,
            request,
            success: false,
            status: TradeStatus::Rejected,
            amount_out: Wad::ZERO,
            secondary_amount_out: None,
            fee: Wad::ZERO,
            price_impact: Decimal::ZERO,
            effective_price: Decimal::ZERO,
            timestamp,
            error: error.kind(),
            error_message: Some(error.to_string()),
            receipt: None,
        }
    }

    /// Mark the committed trade as confirmed by the settlement layer
    pub fn settled(mut self, receipt: TxReceipt) -> Self {
        self.status = TradeStatus::Settled;
        self.receipt = Some(receipt);
        self
    }

    /// Mark the committed trade as refused by the settlement layer
    pub fn reverted(mut self, reason: impl Into<String>, receipt: Option<TxReceipt>) -> Self {
        self.success = false;
        self.status = TradeStatus::Reverted;
        self.error = Some(TradeErrorKind::SettlementFailed);
        self.error_message = Some(reason.into());
        self.receipt = receipt;
        self
    }

    pub fn price_impact_percent(&self) -> Decimal {
        to_percent(self.price_impact)
    }

    /// Get execution summary
    pub fn summary(&self) -> String {
        match self.status {
            TradeStatus::Committed | TradeStatus::Settled => format!(
                "{:?}: #{} {} -> out {} (fee {}, impact {:.4}%)",
                self.status,
                self.trade_id,
                self.request.description(),
                self.amount_out,
                self.fee,
                self.price_impact_percent()
            ),
            TradeStatus::Rejected | TradeStatus::Reverted => format!(
                "{:?}: #{} {} - Error: {}",
                self.status,
                self.trade_id,
                self.request.description(),
                self.error_message.as_deref().unwrap_or("Unknown")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_quote() -> Quote {
        Quote {
            request: TradeRequest::buy("DAI/ETH", Wad::from_units(10)),
            amount_out: Wad::from_units(32_175),
            secondary_amount_out: None,
            fee: Wad::ZERO,
            price_impact: dec!(0.01),
            effective_price: dec!(3250),
            pool_versions: vec![("DAI/ETH".to_string(), 3)],
            quoted_at: 1_000,
            expires_at: 16_000,
        }
    }

    #[test]
    fn test_swap_pool_ids_are_sorted() {
        let request = TradeRequest::swap("WBTC/ETH", "DAI/ETH", Wad::from_units(1));
        assert_eq!(request.pool_ids(), vec!["DAI/ETH".to_string(), "WBTC/ETH".to_string()]);
        assert_eq!(request.kind(), TradeKind::Swap);
    }

    #[test]
    fn test_quote_validity() {
        let quote = sample_quote();
        let current = vec![("DAI/ETH".to_string(), 3)];
        assert!(quote.is_valid_at(&current, 2_000));
        assert!(!quote.is_valid_at(&current, 16_001));

        let mutated = vec![("DAI/ETH".to_string(), 4)];
        assert!(!quote.is_valid_at(&mutated, 2_000));
        assert_eq!(quote.price_impact_percent(), dec!(1.00));
    }

    #[test]
    fn test_result_lifecycle() {
        let quote = sample_quote();
        let committed = TradeResult::committed(7, &quote, 1_000);
        assert!(committed.success);
        assert!(!committed.status.is_terminal());

        let reverted = committed.clone().reverted("execution reverted", None);
        assert!(!reverted.success);
        assert_eq!(reverted.status, TradeStatus::Reverted);
        assert_eq!(reverted.error, Some(TradeErrorKind::SettlementFailed));

        // the original record is untouched
        assert_eq!(committed.status, TradeStatus::Committed);
    }

    #[test]
    fn test_rejected_result_classifies_error() {
        let err = EngineError::DeadlineExceeded { deadline: 10, now: 20 };
        let result = TradeResult::rejected(1, TradeRequest::sell("DAI/ETH", Wad::from_units(5)), &err, 20);
        assert!(!result.success);
        assert_eq!(result.error, Some(TradeErrorKind::DeadlineExceeded));
        assert!(result.summary().starts_with("Rejected"));
    }

    #[test]
    fn test_request_serializes_with_kind_tag() {
        let request = TradeRequest::withdraw("DAI/ETH", "alice", Wad::from_units(2));
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["kind"], "withdraw");
        assert_eq!(json["account"], "alice");
    }
}
