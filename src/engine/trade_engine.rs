use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    engine::planner::{self, PricingContext, TradePlan},
    pool::{
        EffectivePrices, PoolDelta, PoolHandle, PoolRegistry, PoolState,
        registry::{read_all, try_gates, write_all},
    },
    pricing::{LinearImpactModel, PriceImpactModel, RelaxationRate},
    types::{
        EngineError, PoolId, Quote, Result, SpotSource, Timestamp, TradeEvent, TradeRequest, TradeResult, Wad,
    },
    utils::{
        clock::Clock,
        config::{Config, EngineConfig, PoolConfig},
    },
};

/// Quotes and commits trades against the pools it owns.
///
/// Every quote and commit runs the same planner, so a commit at the instant of
/// a quote reproduces it. Commits serialise per pool; a swap takes both pools
/// in pool-id order.
pub struct TradeEngine {
    registry: PoolRegistry,
    config: EngineConfig,
    impact_model: Arc<dyn PriceImpactModel>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<TradeEvent>,
    next_trade_id: AtomicU64,
}

impl TradeEngine {
    pub fn new(config: EngineConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let impact_model = Arc::new(LinearImpactModel::from_config(&config)?);
        let (events, _) = broadcast::channel(config.event_buffer);

        Ok(Self {
            registry: PoolRegistry::new(),
            config,
            impact_model,
            clock,
            events,
            next_trade_id: AtomicU64::new(1),
        })
    }

    /// Build the engine and seed every configured pool
    pub fn from_config(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let engine = Self::new(config.engine.clone(), clock)?;
        for pool in &config.pools {
            engine.create_pool(pool)?;
        }
        info!("Trade engine ready with {} pools", engine.registry.len());
        Ok(engine)
    }

    pub fn with_impact_model(mut self, impact_model: Arc<dyn PriceImpactModel>) -> Self {
        self.impact_model = impact_model;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    // ========== POOLS ==========

    /// Create a pool. Spot defaults to the reserve ratio; anchors default to spot.
    pub fn create_pool(&self, pool: &PoolConfig) -> Result<PoolId> {
        let pair = pool.pair();
        let eth_reserve = Wad::from_decimal(pool.eth_reserve)?;
        let token_reserve = Wad::from_decimal(pool.token_reserve)?;

        let spot = match pool.spot_price {
            Some(spot) => spot,
            None => reserve_spot(pool.eth_reserve, pool.token_reserve).ok_or_else(|| {
                EngineError::InvalidRequest(format!("pool {} needs a spot price or ETH liquidity", pair))
            })?,
        };
        let spot_price = Wad::from_decimal(spot)?;
        if spot_price.is_zero() {
            return Err(EngineError::invalid_amount(format!("spot price of {} must be positive", pair)));
        }

        let half_life = pool
            .relaxation_half_life_secs
            .unwrap_or(self.config.relaxation_half_life_secs);
        let rate = RelaxationRate::from_half_life(half_life)?;

        let mut state = PoolState::new(pair, eth_reserve, token_reserve, spot_price, rate, &pool.provider, self.now())?;
        if pool.buy_anchor.is_some() || pool.sell_anchor.is_some() {
            let buy_anchor = pool.buy_anchor.map(Wad::from_decimal).transpose()?.unwrap_or(spot_price);
            let sell_anchor = pool.sell_anchor.map(Wad::from_decimal).transpose()?.unwrap_or(spot_price);
            state = state.with_anchors(buy_anchor, sell_anchor)?;
        }

        let pool_id = state.pool_id().clone();
        let timestamp = state.last_update_ts();
        self.registry.insert(state)?;
        self.emit(TradeEvent::PoolCreated {
            pool_id: pool_id.clone(),
            spot_price: spot_price.to_decimal()?,
            timestamp,
        });
        Ok(pool_id)
    }

    pub fn pool_ids(&self) -> Vec<PoolId> {
        self.registry.pool_ids()
    }

    /// Consistent copy of one pool
    pub fn pool_snapshot(&self, pool_id: &str) -> Result<PoolState> {
        self.registry.get(pool_id)?.snapshot()
    }

    /// Anchors of `pool_id` relaxed to now
    pub fn effective_prices(&self, pool_id: &str) -> Result<EffectivePrices> {
        self.registry.get(pool_id)?.read()?.effective_prices(self.now())
    }

    pub fn pool_versions(&self, pool_ids: &[PoolId]) -> Result<Vec<(PoolId, u64)>> {
        self.registry
            .handles(pool_ids)?
            .iter()
            .map(|handle| -> Result<(PoolId, u64)> {
                Ok((handle.pool_id().clone(), handle.version()?))
            })
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TradeEvent> {
        self.events.subscribe()
    }

    // ========== QUOTE / COMMIT ==========

    /// Price `request` at the current instant without mutating anything
    pub fn quote(&self, request: &TradeRequest) -> Result<Quote> {
        let handles = self.registry.handles(&request.pool_ids())?;
        let guards = read_all(&handles)?;
        let states: Vec<&PoolState> = guards.iter().map(|guard| &**guard).collect();
        let plan = planner::plan(request, &states, &self.pricing(), self.now())?;
        Ok(plan.quote)
    }

    /// Re-quote `request` now, check deadline and slippage, and apply it.
    ///
    /// User-facing failures come back as a rejected `TradeResult`; only fatal
    /// errors are returned as `Err`.
    pub fn commit(&self, request: TradeRequest, min_amount_out: Wad, deadline: Timestamp) -> Result<TradeResult> {
        let trade_id = self.next_trade_id();
        let now = self.now();

        let outcome = self
            .registry
            .handles(&request.pool_ids())
            .and_then(|handles| {
                let _gates = try_gates(&handles)?;
                let mut guards = write_all(&handles)?;
                let plan = {
                    let states: Vec<&PoolState> = guards.iter().map(|guard| &**guard).collect();
                    self.prepare(&states, &request, min_amount_out, deadline, now)?
                };
                let previous_spots = guards.iter().map(|guard| guard.spot_price()).collect::<Vec<_>>();
                Self::apply_to_guards(&mut guards, &plan)?;
                self.emit_spot_changes(&guards, &previous_spots, SpotSource::Trade, now);
                Ok(plan)
            });

        match outcome {
            Ok(plan) => {
                let result = TradeResult::committed(trade_id, &plan.quote, now);
                info!("{}", result.summary());
                self.emit(TradeEvent::Committed(result.clone()));
                Ok(result)
            }
            Err(err) => self.reject(trade_id, request, err, now),
        }
    }

    /// Move the spot of `pool_id` to an external feed price.
    ///
    /// Relaxation is materialised up to now and anchors are clamped so they
    /// never cross the new spot. Fails with `PoolBusy` while a commit holds the
    /// pool.
    pub fn update_spot_price(&self, pool_id: &str, spot_price: Wad) -> Result<()> {
        if spot_price.is_zero() {
            return Err(EngineError::invalid_amount("spot price must be positive"));
        }

        let handle = self.registry.get(pool_id)?;
        let _gate = handle.try_gate()?;
        let mut state = handle.write()?;

        let now = self.now();
        let prices = state.effective_prices(now)?;
        let new_spot = spot_price.to_decimal()?;
        let delta = PoolDelta {
            eth_in: Wad::ZERO,
            eth_out: Wad::ZERO,
            token_in: Wad::ZERO,
            token_out: Wad::ZERO,
            spot_price,
            buy_anchor: Wad::from_decimal(prices.buy.max(new_spot))?,
            sell_anchor: Wad::from_decimal(prices.sell.min(new_spot))?,
            lp_change: None,
            timestamp: now,
        };
        state.apply_trade(&delta).inspect_err(|e| error!("Spot update on {} failed: {}", pool_id, e))?;

        debug!("Spot {} {} -> {}", pool_id, prices.spot, new_spot);
        self.emit(TradeEvent::SpotUpdated {
            pool_id: pool_id.to_string(),
            old_spot: prices.spot,
            new_spot,
            source: SpotSource::Feed,
            timestamp: now,
        });
        Ok(())
    }

    // ========== SETTLEMENT HOOKS ==========

    pub(crate) fn next_trade_id(&self) -> u64 {
        self.next_trade_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn handles(&self, request: &TradeRequest) -> Result<Vec<Arc<PoolHandle>>> {
        self.registry.handles(&request.pool_ids())
    }

    /// Plan under read locks. The caller must hold the commit gates.
    pub(crate) fn prepare_gated(
        &self,
        handles: &[Arc<PoolHandle>],
        request: &TradeRequest,
        min_amount_out: Wad,
        deadline: Timestamp,
        now: Timestamp,
    ) -> Result<TradePlan> {
        let guards = read_all(handles)?;
        let states: Vec<&PoolState> = guards.iter().map(|guard| &**guard).collect();
        self.prepare(&states, request, min_amount_out, deadline, now)
    }

    /// Apply a prepared plan, returning the pre-trade snapshots for rollback.
    /// The caller must hold the commit gates taken before planning.
    pub(crate) fn apply_prepared(&self, handles: &[Arc<PoolHandle>], plan: &TradePlan) -> Result<Vec<PoolState>> {
        let mut guards = write_all(handles)?;

        for (pool_id, version) in &plan.quote.pool_versions {
            let current = guards
                .iter()
                .find(|guard| guard.pool_id() == pool_id)
                .map(|guard| guard.version());
            if current != Some(*version) {
                let err = EngineError::invariant(format!(
                    "pool {} changed while its commit gate was held ({:?} != {})",
                    pool_id, current, version
                ));
                error!("{}", err);
                return Err(err);
            }
        }

        let before: Vec<PoolState> = guards.iter().map(|guard| (**guard).clone()).collect();
        let previous_spots = before.iter().map(PoolState::spot_price).collect::<Vec<_>>();
        Self::apply_to_guards(&mut guards, plan)?;
        self.emit_spot_changes(&guards, &previous_spots, SpotSource::Trade, self.now());
        Ok(before)
    }

    /// Undo an optimistically applied plan by restoring `before`
    pub(crate) fn rollback(&self, handles: &[Arc<PoolHandle>], plan: &TradePlan, before: &[PoolState]) -> Result<()> {
        let mut guards = write_all(handles)?;
        let previous_spots = guards.iter().map(|guard| guard.spot_price()).collect::<Vec<_>>();

        for guard in guards.iter_mut() {
            let Some((_, delta)) = plan.deltas.iter().find(|(pool_id, _)| pool_id == guard.pool_id()) else {
                continue;
            };
            let snapshot = before
                .iter()
                .find(|state| state.pool_id() == guard.pool_id())
                .ok_or_else(|| EngineError::invariant(format!("no snapshot for {}", guard.pool_id())))?;
            guard
                .apply_trade(&delta.reverting(snapshot))
                .inspect_err(|e| error!("Rollback of {} failed: {}", snapshot.pool_id(), e))?;
            warn!("Rolled back {} to its pre-trade state", snapshot.pool_id());
        }

        self.emit_spot_changes(&guards, &previous_spots, SpotSource::Rollback, self.now());
        Ok(())
    }

    /// Turn a user-facing error into a rejected result; pass fatal ones through
    pub(crate) fn reject(
        &self,
        trade_id: u64,
        request: TradeRequest,
        err: EngineError,
        now: Timestamp,
    ) -> Result<TradeResult> {
        if err.is_fatal() || err.kind().is_none() {
            error!("Trade #{} aborted: {}", trade_id, err);
            return Err(err);
        }

        let result = TradeResult::rejected(trade_id, request, &err, now);
        warn!("{}", result.summary());
        self.emit(TradeEvent::Rejected(result.clone()));
        Ok(result)
    }

    pub(crate) fn emit(&self, event: TradeEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    // ========== INTERNALS ==========

    fn pricing(&self) -> PricingContext<'_> {
        PricingContext {
            config: &self.config,
            impact_model: self.impact_model.as_ref(),
        }
    }

    fn prepare(
        &self,
        states: &[&PoolState],
        request: &TradeRequest,
        min_amount_out: Wad,
        deadline: Timestamp,
        now: Timestamp,
    ) -> Result<TradePlan> {
        if now > deadline {
            return Err(EngineError::DeadlineExceeded { deadline, now });
        }

        let plan = planner::plan(request, states, &self.pricing(), now)?;
        if plan.quote.amount_out < min_amount_out {
            return Err(EngineError::SlippageExceeded {
                min_amount_out: min_amount_out.to_decimal()?,
                amount_out: plan.quote.amount_out.to_decimal()?,
            });
        }
        Ok(plan)
    }

    /// Validate every delta first so a multi-pool plan applies all or nothing
    fn apply_to_guards<G>(guards: &mut [G], plan: &TradePlan) -> Result<()>
    where
        G: std::ops::DerefMut<Target = PoolState>,
    {
        let mut staged = Vec::with_capacity(plan.deltas.len());
        for (pool_id, delta) in &plan.deltas {
            let index = guards
                .iter()
                .position(|guard| guard.pool_id() == pool_id)
                .ok_or_else(|| EngineError::invariant(format!("plan touches unlocked pool {}", pool_id)))?;
            guards[index]
                .preview(delta)
                .inspect_err(|e| error!("Rejected delta for {}: {}", pool_id, e))?;
            staged.push((index, delta));
        }

        for (index, delta) in staged {
            guards[index].apply_trade(delta)?;
        }
        Ok(())
    }

    fn emit_spot_changes<G>(&self, guards: &[G], previous: &[Wad], source: SpotSource, now: Timestamp)
    where
        G: std::ops::Deref<Target = PoolState>,
    {
        for (guard, old) in guards.iter().zip(previous) {
            if guard.spot_price() == *old {
                continue;
            }
            if let (Ok(old_spot), Ok(new_spot)) = (old.to_decimal(), guard.spot_price().to_decimal()) {
                self.emit(TradeEvent::SpotUpdated {
                    pool_id: guard.pool_id().clone(),
                    old_spot,
                    new_spot,
                    source,
                    timestamp: now,
                });
            }
        }
    }
}

/// Spot implied by `token_reserve / eth_reserve`
pub fn reserve_spot(eth_reserve: Decimal, token_reserve: Decimal) -> Option<Decimal> {
    if eth_reserve <= Decimal::ZERO {
        return None;
    }
    token_reserve.checked_div(eth_reserve)
}
