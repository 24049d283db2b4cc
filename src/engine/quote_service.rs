use rust_decimal::Decimal;
use std::sync::Arc;

use crate::{
    engine::TradeEngine,
    pool::EffectivePrices,
    types::{PoolId, Quote, Result, TradeRequest, Wad},
    utils::math::apply_slippage_tolerance,
};

/// Read-only previews for the presentation layer.
///
/// Quotes are advisory: `TradeEngine::commit` always prices again.
#[derive(Clone)]
pub struct QuoteService {
    engine: Arc<TradeEngine>,
}

impl QuoteService {
    pub fn new(engine: Arc<TradeEngine>) -> Self {
        Self { engine }
    }

    pub fn quote(&self, request: &TradeRequest) -> Result<Quote> {
        self.engine.quote(request)
    }

    /// Quote every request independently
    pub fn quote_all(&self, requests: &[TradeRequest]) -> Vec<Result<Quote>> {
        requests.iter().map(|request| self.quote(request)).collect()
    }

    /// Minimum output to pass to `commit` for `quote` under `slippage_tolerance`
    pub fn suggest_min_amount_out(&self, quote: &Quote, slippage_tolerance: Decimal) -> Result<Wad> {
        apply_slippage_tolerance(quote.amount_out, slippage_tolerance)
    }

    /// Whether `quote` still reflects the pools and has not expired
    pub fn is_current(&self, quote: &Quote) -> Result<bool> {
        let pool_ids: Vec<PoolId> = quote.pool_versions.iter().map(|(pool_id, _)| pool_id.clone()).collect();
        let versions = self.engine.pool_versions(&pool_ids)?;
        Ok(quote.is_valid_at(&versions, self.engine.now()))
    }

    pub fn effective_prices(&self, pool_id: &str) -> Result<EffectivePrices> {
        self.engine.effective_prices(pool_id)
    }
}
