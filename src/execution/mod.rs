pub mod executor;
pub mod settlement;

pub use executor::{ExecutionStats, TradeExecutor, TradeOrder};
pub use settlement::{DryRunSettlement, DryRunSigner, IntentSigner, SettlementClient};
