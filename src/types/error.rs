use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{PoolId, Timestamp};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Pool not found: {0}")]
    PoolNotFound(PoolId),

    #[error("Pool already exists: {0}")]
    PoolExists(PoolId),

    #[error("Insufficient reserve in pool {pool_id}: {message}")]
    InsufficientReserve { pool_id: PoolId, message: String },

    #[error("Insufficient LP balance for {account}: requested {requested}, available {available}")]
    InsufficientLpBalance {
        account: String,
        requested: Decimal,
        available: Decimal,
    },

    #[error("Slippage exceeded: minimum {min_amount_out}, quoted {amount_out}")]
    SlippageExceeded {
        min_amount_out: Decimal,
        amount_out: Decimal,
    },

    #[error("Deadline exceeded: deadline {deadline}, now {now}")]
    DeadlineExceeded { deadline: Timestamp, now: Timestamp },

    #[error("Deposit ratio deviates {deviation} from pool ratio (tolerance {tolerance})")]
    RatioToleranceExceeded { deviation: Decimal, tolerance: Decimal },

    #[error("Pool {0} has a commit in flight")]
    PoolBusy(PoolId),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Settlement error: {0}")]
    Settlement(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Decimal error: {0}")]
    Decimal(#[from] rust_decimal::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn invalid_amount(message: impl Into<String>) -> Self {
        Self::InvalidAmount(message.into())
    }

    pub fn insufficient_reserve(pool_id: &PoolId, message: impl Into<String>) -> Self {
        Self::InsufficientReserve {
            pool_id: pool_id.clone(),
            message: message.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation(message.into())
    }

    /// Fatal errors signal a bug in the engine and must not be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }

    /// Classification carried inside a failed `TradeResult`.
    /// Returns `None` for errors that never reach a trade result.
    pub fn kind(&self) -> Option<TradeErrorKind> {
        let kind = match self {
            Self::InvalidAmount(_) => TradeErrorKind::InvalidAmount,
            Self::InvalidRequest(_) => TradeErrorKind::InvalidRequest,
            Self::PoolNotFound(_) => TradeErrorKind::PoolNotFound,
            Self::InsufficientReserve { .. } => TradeErrorKind::InsufficientReserve,
            Self::InsufficientLpBalance { .. } => TradeErrorKind::InsufficientLpBalance,
            Self::SlippageExceeded { .. } => TradeErrorKind::SlippageExceeded,
            Self::DeadlineExceeded { .. } => TradeErrorKind::DeadlineExceeded,
            Self::RatioToleranceExceeded { .. } => TradeErrorKind::RatioToleranceExceeded,
            Self::PoolBusy(_) => TradeErrorKind::PoolBusy,
            Self::Settlement(_) => TradeErrorKind::SettlementFailed,
            _ => return None,
        };
        Some(kind)
    }
}

/// User-facing failure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeErrorKind {
    InvalidAmount,
    InvalidRequest,
    PoolNotFound,
    InsufficientReserve,
    InsufficientLpBalance,
    SlippageExceeded,
    DeadlineExceeded,
    RatioToleranceExceeded,
    PoolBusy,
    SettlementFailed,
}
