pub mod planner;
pub mod quote_service;
pub mod trade_engine;

pub use planner::TradePlan;
pub use quote_service::QuoteService;
pub use trade_engine::TradeEngine;
