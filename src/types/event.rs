use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{PoolId, Timestamp, TradeResult};

/// Notification broadcast by the engine after every state-relevant step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TradeEvent {
    PoolCreated {
        pool_id: PoolId,
        spot_price: Decimal,
        timestamp: Timestamp,
    },
    Committed(TradeResult),
    Rejected(TradeResult),
    Settled(TradeResult),
    Reverted(TradeResult),
    SpotUpdated {
        pool_id: PoolId,
        old_spot: Decimal,
        new_spot: Decimal,
        source: SpotSource,
        timestamp: Timestamp,
    },
}

/// What moved the spot price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpotSource {
    /// Reserve ratio after a trade
    Trade,
    /// External price feed
    Feed,
    /// Settlement rollback restored an earlier state
    Rollback,
}

impl TradeEvent {
    pub fn trade_result(&self) -> Option<&TradeResult> {
        match self {
            TradeEvent::Committed(result)
            | TradeEvent::Rejected(result)
            | TradeEvent::Settled(result)
            | TradeEvent::Reverted(result) => Some(result),
            _ => None,
        }
    }

    /// Get description
    pub fn description(&self) -> String {
        match self {
            TradeEvent::PoolCreated { pool_id, spot_price, .. } => {
                format!("Pool {} created at spot {}", pool_id, spot_price)
            }
            TradeEvent::SpotUpdated { pool_id, old_spot, new_spot, source, .. } => {
                format!("Spot {} {} -> {} ({:?})", pool_id, old_spot, new_spot, source)
            }
            TradeEvent::Committed(result)
            | TradeEvent::Rejected(result)
            | TradeEvent::Settled(result)
            | TradeEvent::Reverted(result) => result.summary(),
        }
    }
}
