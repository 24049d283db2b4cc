//! Pure pricing of a trade request against pool snapshots.
//!
//! `TradeEngine::quote` and `TradeEngine::commit` both run [`plan`], so a
//! commit at the same instant and pool versions as a quote reproduces it
//! exactly.

use rust_decimal::Decimal;

use crate::{
    pool::{EffectivePrices, LpChange, PoolDelta, PoolState, state::initial_liquidity},
    pricing::{
        PriceImpactModel,
        impact::{quote_buy, quote_sell},
    },
    types::{EngineError, PoolId, Quote, Result, Timestamp, TradeRequest, Wad},
    utils::{config::EngineConfig, math::relative_deviation},
};

/// Engine-wide inputs to pricing
pub struct PricingContext<'a> {
    pub config: &'a EngineConfig,
    pub impact_model: &'a dyn PriceImpactModel,
}

/// Quote plus the per-pool changes that realise it
#[derive(Debug, Clone, PartialEq)]
pub struct TradePlan {
    pub quote: Quote,
    pub deltas: Vec<(PoolId, PoolDelta)>,
}

struct Priced {
    amount_out: Wad,
    secondary_amount_out: Option<Wad>,
    fee: Wad,
    impact: Decimal,
    effective_price: Decimal,
    deltas: Vec<(PoolId, PoolDelta)>,
}

struct Leg {
    amount_out: Wad,
    fee: Wad,
    impact: Decimal,
    effective_price: Decimal,
    delta: PoolDelta,
}

impl From<(PoolId, Leg)> for Priced {
    fn from((pool_id, leg): (PoolId, Leg)) -> Self {
        Self {
            amount_out: leg.amount_out,
            secondary_amount_out: None,
            fee: leg.fee,
            impact: leg.impact,
            effective_price: leg.effective_price,
            deltas: vec![(pool_id, leg.delta)],
        }
    }
}

/// Price `request` at `now` against `pools` without touching them
pub fn plan(request: &TradeRequest, pools: &[&PoolState], ctx: &PricingContext<'_>, now: Timestamp) -> Result<TradePlan> {
    let priced: Priced = match request {
        TradeRequest::Buy { pool_id, eth_in } => (pool_id.clone(), buy_leg(find(pools, pool_id)?, *eth_in, ctx, now)?).into(),
        TradeRequest::Sell { pool_id, token_in } => {
            (pool_id.clone(), sell_leg(find(pools, pool_id)?, *token_in, ctx, now)?).into()
        }
        TradeRequest::Swap { pool_in, pool_out, amount_in } => {
            if pool_in == pool_out {
                return Err(EngineError::InvalidRequest(format!("swap from {} into itself", pool_in)));
            }
            swap(find(pools, pool_in)?, find(pools, pool_out)?, *amount_in, ctx, now)?
        }
        TradeRequest::Deposit { pool_id, account, eth_amount, token_amount } => {
            deposit(find(pools, pool_id)?, account, *eth_amount, *token_amount, ctx, now)?
        }
        TradeRequest::Withdraw { pool_id, account, lp_amount } => withdraw(find(pools, pool_id)?, account, *lp_amount, now)?,
    };

    let pool_versions = request
        .pool_ids()
        .into_iter()
        .map(|pool_id| find(pools, &pool_id).map(|pool| (pool_id, pool.version())))
        .collect::<Result<Vec<_>>>()?;

    let quote = Quote {
        request: request.clone(),
        amount_out: priced.amount_out,
        secondary_amount_out: priced.secondary_amount_out,
        fee: priced.fee,
        price_impact: priced.impact,
        effective_price: priced.effective_price,
        pool_versions,
        quoted_at: now,
        expires_at: now.saturating_add(ctx.config.quote_ttl_ms),
    };

    Ok(TradePlan { quote, deltas: priced.deltas })
}

fn find<'p>(pools: &[&'p PoolState], pool_id: &str) -> Result<&'p PoolState> {
    pools
        .iter()
        .copied()
        .find(|pool| pool.pool_id() == pool_id)
        .ok_or_else(|| EngineError::PoolNotFound(pool_id.to_string()))
}

/// ETH in, base token out, priced at the relaxed buy anchor
fn buy_leg(pool: &PoolState, eth_in: Wad, ctx: &PricingContext<'_>, now: Timestamp) -> Result<Leg> {
    ensure_positive(eth_in, "ETH in")?;
    ensure_liquidity(pool)?;

    let prices = pool.effective_prices(now)?;
    let (fee, net_in) = split_fee(eth_in, ctx.config.fee_rate)?;
    let impact = ctx.impact_model.impact(net_in, pool.eth_reserve().to_decimal()?)?;
    let tokens_out = Wad::from_decimal(quote_buy(net_in, prices.buy, impact)?)?;
    ensure_positive(tokens_out, "token out")?;

    let token_reserve = drain(pool, pool.token_reserve(), tokens_out, ctx)?;
    let eth_reserve = pool
        .eth_reserve()
        .checked_add(eth_in)
        .ok_or_else(|| EngineError::invalid_amount("ETH reserve overflows"))?;
    let spot = post_trade_spot(pool, eth_reserve, token_reserve, ctx)?;
    let (buy_anchor, sell_anchor) = nudge_buy(&prices, spot, impact, ctx)?;

    Ok(Leg {
        amount_out: tokens_out,
        fee,
        impact,
        effective_price: prices.buy,
        delta: PoolDelta {
            eth_in,
            eth_out: Wad::ZERO,
            token_in: Wad::ZERO,
            token_out: tokens_out,
            spot_price: spot,
            buy_anchor,
            sell_anchor,
            lp_change: None,
            timestamp: now,
        },
    })
}

/// Base token in, ETH out, priced at the relaxed sell anchor
fn sell_leg(pool: &PoolState, token_in: Wad, ctx: &PricingContext<'_>, now: Timestamp) -> Result<Leg> {
    ensure_positive(token_in, "token in")?;
    ensure_liquidity(pool)?;

    let prices = pool.effective_prices(now)?;
    let (fee, net_in) = split_fee(token_in, ctx.config.fee_rate)?;
    let impact = ctx.impact_model.impact(net_in, pool.token_reserve().to_decimal()?)?;
    let eth_out = Wad::from_decimal(quote_sell(net_in, prices.sell, impact)?)?;
    ensure_positive(eth_out, "ETH out")?;

    let eth_reserve = drain(pool, pool.eth_reserve(), eth_out, ctx)?;
    let token_reserve = pool
        .token_reserve()
        .checked_add(token_in)
        .ok_or_else(|| EngineError::invalid_amount("token reserve overflows"))?;
    let spot = post_trade_spot(pool, eth_reserve, token_reserve, ctx)?;
    let (buy_anchor, sell_anchor) = nudge_sell(&prices, spot, impact, ctx)?;

    Ok(Leg {
        amount_out: eth_out,
        fee,
        impact,
        effective_price: prices.sell,
        delta: PoolDelta {
            eth_in: Wad::ZERO,
            eth_out,
            token_in,
            token_out: Wad::ZERO,
            spot_price: spot,
            buy_anchor,
            sell_anchor,
            lp_change: None,
            timestamp: now,
        },
    })
}

/// Token A -> ETH on `pool_in`, then ETH -> token B on `pool_out`
fn swap(pool_in: &PoolState, pool_out: &PoolState, amount_in: Wad, ctx: &PricingContext<'_>, now: Timestamp) -> Result<Priced> {
    let first = sell_leg(pool_in, amount_in, ctx, now)?;
    let second = buy_leg(pool_out, first.amount_out, ctx, now)?;

    // second-leg fee is charged in ETH; express it in token A
    let second_fee = Wad::from_decimal(second.fee.to_decimal()? * first.effective_price)?;
    let fee = first
        .fee
        .checked_add(second_fee)
        .ok_or_else(|| EngineError::invalid_amount("swap fee overflows"))?;
    // each leg is capped on its own; the compounded figure is reported within the same cap
    let impact = (Decimal::ONE - (Decimal::ONE - first.impact) * (Decimal::ONE - second.impact))
        .min(ctx.impact_model.cap());

    Ok(Priced {
        amount_out: second.amount_out,
        secondary_amount_out: None,
        fee,
        impact,
        effective_price: second.effective_price / first.effective_price,
        deltas: vec![
            (pool_in.pool_id().clone(), first.delta),
            (pool_out.pool_id().clone(), second.delta),
        ],
    })
}

fn deposit(
    pool: &PoolState,
    account: &str,
    eth_amount: Wad,
    token_amount: Wad,
    ctx: &PricingContext<'_>,
    now: Timestamp,
) -> Result<Priced> {
    ensure_positive(eth_amount, "ETH deposit")?;
    ensure_positive(token_amount, "token deposit")?;
    ensure_account(account)?;

    let minted = if !pool.has_liquidity() || pool.lp_total_supply().is_zero() {
        initial_liquidity(eth_amount, token_amount)?
    } else {
        let eth_reserve = pool.eth_reserve().to_decimal()?;
        let token_reserve = pool.token_reserve().to_decimal()?;
        let eth = eth_amount.to_decimal()?;
        let tokens = token_amount.to_decimal()?;

        let deviation = relative_deviation(tokens / eth, token_reserve / eth_reserve)?;
        if deviation > ctx.config.deposit_ratio_tolerance {
            return Err(EngineError::RatioToleranceExceeded {
                deviation,
                tolerance: ctx.config.deposit_ratio_tolerance,
            });
        }

        // the smaller side sets the share so existing LPs never lose value
        let share = (eth / eth_reserve).min(tokens / token_reserve);
        Wad::from_decimal(share * pool.lp_total_supply().to_decimal()?)?
    };
    ensure_positive(minted, "LP minted")?;

    let prices = pool.effective_prices(now)?;
    let delta = PoolDelta {
        eth_in: eth_amount,
        eth_out: Wad::ZERO,
        token_in: token_amount,
        token_out: Wad::ZERO,
        spot_price: pool.spot_price(),
        buy_anchor: Wad::from_decimal(prices.buy)?,
        sell_anchor: Wad::from_decimal(prices.sell)?,
        lp_change: Some(LpChange::Mint {
            account: account.to_string(),
            amount: minted,
        }),
        timestamp: now,
    };

    Ok(Priced {
        amount_out: minted,
        secondary_amount_out: None,
        fee: Wad::ZERO,
        impact: Decimal::ZERO,
        effective_price: prices.spot,
        deltas: vec![(pool.pool_id().clone(), delta)],
    })
}

fn withdraw(pool: &PoolState, account: &str, lp_amount: Wad, now: Timestamp) -> Result<Priced> {
    ensure_positive(lp_amount, "LP withdrawal")?;
    ensure_account(account)?;

    let balance = pool.lp_balance(account);
    if lp_amount > balance {
        return Err(EngineError::InsufficientLpBalance {
            account: account.to_string(),
            requested: lp_amount.to_decimal()?,
            available: balance.to_decimal()?,
        });
    }

    let share = lp_amount.to_decimal()? / pool.lp_total_supply().to_decimal()?;
    let eth_out = Wad::from_decimal(pool.eth_reserve().to_decimal()? * share)?;
    let token_out = Wad::from_decimal(pool.token_reserve().to_decimal()? * share)?;

    let prices = pool.effective_prices(now)?;
    let delta = PoolDelta {
        eth_in: Wad::ZERO,
        eth_out,
        token_in: Wad::ZERO,
        token_out,
        spot_price: pool.spot_price(),
        buy_anchor: Wad::from_decimal(prices.buy)?,
        sell_anchor: Wad::from_decimal(prices.sell)?,
        lp_change: Some(LpChange::Burn {
            account: account.to_string(),
            amount: lp_amount,
        }),
        timestamp: now,
    };

    Ok(Priced {
        amount_out: eth_out,
        secondary_amount_out: Some(token_out),
        fee: Wad::ZERO,
        impact: Decimal::ZERO,
        effective_price: prices.spot,
        deltas: vec![(pool.pool_id().clone(), delta)],
    })
}

fn ensure_positive(amount: Wad, what: &str) -> Result<()> {
    if amount.is_zero() {
        return Err(EngineError::invalid_amount(format!("{} must be positive", what)));
    }
    Ok(())
}

fn ensure_liquidity(pool: &PoolState) -> Result<()> {
    if !pool.has_liquidity() {
        return Err(EngineError::insufficient_reserve(pool.pool_id(), "pool has no liquidity"));
    }
    Ok(())
}

fn ensure_account(account: &str) -> Result<()> {
    if account.trim().is_empty() {
        return Err(EngineError::InvalidRequest("LP account is empty".into()));
    }
    Ok(())
}

/// Fee retained by the pool and the net amount that is priced
fn split_fee(amount_in: Wad, fee_rate: Decimal) -> Result<(Wad, Decimal)> {
    let gross = amount_in.to_decimal()?;
    let fee = Wad::from_decimal(gross * fee_rate)?;
    Ok((fee, gross - fee.to_decimal()?))
}

/// Reserve left after paying `amount_out`, which must stay above the floor
fn drain(pool: &PoolState, reserve: Wad, amount_out: Wad, ctx: &PricingContext<'_>) -> Result<Wad> {
    let floor = Wad::from_decimal(ctx.config.min_reserve)?;
    let remaining = reserve.checked_sub(amount_out).ok_or_else(|| {
        EngineError::insufficient_reserve(pool.pool_id(), format!("output {} exceeds reserve {}", amount_out, reserve))
    })?;
    if remaining < floor {
        return Err(EngineError::insufficient_reserve(
            pool.pool_id(),
            format!("output {} would leave {} below floor {}", amount_out, remaining, floor),
        ));
    }
    Ok(remaining)
}

fn post_trade_spot(pool: &PoolState, eth_reserve: Wad, token_reserve: Wad, ctx: &PricingContext<'_>) -> Result<Wad> {
    if !ctx.config.spot_follows_reserves {
        return Ok(pool.spot_price());
    }
    if eth_reserve.is_zero() {
        return Err(EngineError::insufficient_reserve(pool.pool_id(), "trade would empty the ETH reserve"));
    }
    let spot = Wad::from_decimal(token_reserve.to_decimal()? / eth_reserve.to_decimal()?)?;
    if spot.is_zero() {
        return Err(EngineError::insufficient_reserve(pool.pool_id(), "trade would zero the spot price"));
    }
    Ok(spot)
}

/// Buy anchor pushed further above spot; sell anchor relaxed and clamped
fn nudge_buy(prices: &EffectivePrices, spot: Wad, impact: Decimal, ctx: &PricingContext<'_>) -> Result<(Wad, Wad)> {
    let spot = spot.to_decimal()?;
    let push = Decimal::ONE + impact * ctx.config.anchor_nudge_factor;
    Ok((
        Wad::from_decimal(prices.buy.max(spot) * push)?,
        Wad::from_decimal(prices.sell.min(spot))?,
    ))
}

/// Sell anchor pushed further below spot; buy anchor relaxed and clamped
fn nudge_sell(prices: &EffectivePrices, spot: Wad, impact: Decimal, ctx: &PricingContext<'_>) -> Result<(Wad, Wad)> {
    let spot = spot.to_decimal()?;
    let push = Decimal::ONE - impact * ctx.config.anchor_nudge_factor;
    Ok((
        Wad::from_decimal(prices.buy.max(spot))?,
        Wad::from_decimal(prices.sell.min(spot) * push)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pricing::{LinearImpactModel, RelaxationRate},
        types::{TokenInfo, TokenPair},
    };
    use rust_decimal_macros::dec;

    fn config() -> EngineConfig {
        EngineConfig {
            fee_rate: Decimal::ZERO,
            ..EngineConfig::default()
        }
    }

    fn dai_pool() -> PoolState {
        PoolState::new(
            TokenPair::with_eth(TokenInfo::new("DAI")),
            Wad::from_units(1000),
            Wad::from_units(3_200_000),
            Wad::from_units(3200),
            RelaxationRate::from_half_life(dec!(60)).unwrap(),
            "treasury",
            0,
        )
        .unwrap()
        .with_anchors(Wad::from_units(3250), Wad::from_units(3150))
        .unwrap()
    }

    fn run(request: &TradeRequest, pools: &[&PoolState], config: &EngineConfig, now: Timestamp) -> Result<TradePlan> {
        let model = LinearImpactModel::from_config(config).unwrap();
        let ctx = PricingContext {
            config,
            impact_model: &model,
        };
        plan(request, pools, &ctx, now)
    }

    #[test]
    fn test_buy_prices_at_buy_anchor() {
        let pool = dai_pool();
        let plan = run(&TradeRequest::buy("DAI/ETH", Wad::from_units(10)), &[&pool], &config(), 0).unwrap();

        // 10 * 3250 * (1 - 10 / 1000)
        assert_eq!(plan.quote.amount_out, Wad::from_units(32_175));
        assert_eq!(plan.quote.price_impact, dec!(0.01));
        assert_eq!(plan.quote.effective_price, dec!(3250));
        assert_eq!(plan.quote.pool_versions, vec![("DAI/ETH".to_string(), 0)]);
        assert_eq!(plan.quote.expires_at, 15_000);

        let (_, delta) = &plan.deltas[0];
        assert_eq!(delta.buy_anchor.to_decimal().unwrap(), dec!(3282.5));
        assert_eq!(delta.sell_anchor, Wad::from_units(3150));
        assert_eq!(delta.spot_price, Wad::from_units(3200));
    }

    #[test]
    fn test_sell_nudges_sell_anchor_down() {
        let pool = dai_pool();
        let plan = run(&TradeRequest::sell("DAI/ETH", Wad::from_units(32_000)), &[&pool], &config(), 0).unwrap();

        // 32000 / 3150 * (1 - 0.01)
        let eth_out = plan.quote.amount_out.to_decimal().unwrap();
        assert!((eth_out - dec!(10.057142857142857142)).abs() < dec!(0.000000001));

        let (_, delta) = &plan.deltas[0];
        assert_eq!(delta.sell_anchor.to_decimal().unwrap(), dec!(3118.5));
        assert_eq!(delta.buy_anchor, Wad::from_units(3250));
    }

    #[test]
    fn test_fee_is_taken_from_input() {
        let pool = dai_pool();
        let plan = run(
            &TradeRequest::buy("DAI/ETH", Wad::from_units(10)),
            &[&pool],
            &EngineConfig::default(),
            0,
        )
        .unwrap();

        assert_eq!(plan.quote.fee.to_decimal().unwrap(), dec!(0.03));
        // the whole input including the fee stays in the pool
        assert_eq!(plan.deltas[0].1.eth_in, Wad::from_units(10));
        assert!(plan.quote.amount_out < Wad::from_units(32_175));
    }

    #[test]
    fn test_spot_can_follow_reserves() {
        let pool = dai_pool();
        let config = EngineConfig {
            spot_follows_reserves: true,
            ..config()
        };
        let plan = run(&TradeRequest::buy("DAI/ETH", Wad::from_units(10)), &[&pool], &config, 0).unwrap();

        let (_, delta) = &plan.deltas[0];
        let spot = delta.spot_price.to_decimal().unwrap();
        // (3_200_000 - 32_175) / 1010
        assert!((spot - dec!(3136.460396039603960396)).abs() < dec!(0.000001));
        assert!(delta.buy_anchor >= delta.spot_price);
        assert!(delta.sell_anchor <= delta.spot_price);
    }

    #[test]
    fn test_drain_below_floor_is_rejected() {
        let pool = PoolState::new(
            TokenPair::with_eth(TokenInfo::new("DAI")),
            Wad::from_units(1),
            Wad::from_units(3200),
            Wad::from_units(3200),
            RelaxationRate::NONE,
            "treasury",
            0,
        )
        .unwrap();
        let err = run(&TradeRequest::buy("DAI/ETH", Wad::from_units(10)), &[&pool], &config(), 0).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientReserve { .. }));
    }

    #[test]
    fn test_zero_amount_and_missing_pool() {
        let pool = dai_pool();
        let err = run(&TradeRequest::buy("DAI/ETH", Wad::ZERO), &[&pool], &config(), 0).unwrap_err();
        assert!(matches!(err, EngineError::InvalidAmount(_)));

        let err = run(&TradeRequest::buy("USDC/ETH", Wad::ONE), &[&pool], &config(), 0).unwrap_err();
        assert!(matches!(err, EngineError::PoolNotFound(_)));

        let err = run(&TradeRequest::swap("DAI/ETH", "DAI/ETH", Wad::ONE), &[&pool], &config(), 0).unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));
    }

    #[test]
    fn test_deposit_ratio_tolerance() {
        let pool = dai_pool();
        let skewed = TradeRequest::deposit("DAI/ETH", "alice", Wad::from_units(1), Wad::from_units(3520));
        let err = run(&skewed, &[&pool], &config(), 0).unwrap_err();
        assert!(matches!(err, EngineError::RatioToleranceExceeded { .. }));

        let balanced = TradeRequest::deposit("DAI/ETH", "alice", Wad::from_units(10), Wad::from_units(32_000));
        let plan = run(&balanced, &[&pool], &config(), 0).unwrap();
        let expected = pool.lp_total_supply().to_decimal().unwrap() / dec!(100);
        let minted = plan.quote.amount_out.to_decimal().unwrap();
        assert!((minted - expected).abs() < dec!(0.000001));
    }

    #[test]
    fn test_withdraw_requires_balance() {
        let pool = dai_pool();
        let err = run(
            &TradeRequest::withdraw("DAI/ETH", "alice", Wad::from_units(1)),
            &[&pool],
            &config(),
            0,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientLpBalance { .. }));

        let tenth = Wad::from_decimal(pool.lp_total_supply().to_decimal().unwrap() / dec!(10)).unwrap();
        let plan = run(&TradeRequest::withdraw("DAI/ETH", "treasury", tenth), &[&pool], &config(), 0).unwrap();
        let eth_out = plan.quote.amount_out.to_decimal().unwrap();
        let token_out = plan.quote.secondary_amount_out.unwrap().to_decimal().unwrap();
        assert!((eth_out - dec!(100)).abs() < dec!(0.000001));
        assert!((token_out - dec!(320000)).abs() < dec!(0.001));
    }
}
