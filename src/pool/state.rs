use rust_decimal::{Decimal, MathematicalOps};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{
    pricing::{RelaxationRate, elapsed_secs, relax},
    types::{AccountId, EngineError, PoolId, Result, Timestamp, TokenPair, Wad},
};

/// Reserves, anchors and LP ledger of one base-token/ETH pool.
///
/// Prices are WAD-scaled tokens per ETH. The only mutator is
/// [`PoolState::apply_trade`], which validates the candidate state before
/// committing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolState {
    pool_id: PoolId,
    pair: TokenPair,
    eth_reserve: Wad,
    token_reserve: Wad,
    spot_price: Wad,
    buy_anchor: Wad,
    sell_anchor: Wad,
    last_update_ts: Timestamp,
    relaxation_rate: RelaxationRate,
    lp_total_supply: Wad,
    lp_balances: BTreeMap<AccountId, Wad>,
    version: u64,
}

/// Anchors relaxed to a point in time, in decimal form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectivePrices {
    pub buy: Decimal,
    pub spot: Decimal,
    pub sell: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LpChange {
    Mint { account: AccountId, amount: Wad },
    Burn { account: AccountId, amount: Wad },
}

impl LpChange {
    pub fn inverse(&self) -> LpChange {
        match self {
            LpChange::Mint { account, amount } => LpChange::Burn {
                account: account.clone(),
                amount: *amount,
            },
            LpChange::Burn { account, amount } => LpChange::Mint {
                account: account.clone(),
                amount: *amount,
            },
        }
    }
}

/// Change produced by the engine for one pool.
///
/// Reserve movements are relative; prices are the absolute post-trade values
/// materialised at `timestamp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolDelta {
    pub eth_in: Wad,
    pub eth_out: Wad,
    pub token_in: Wad,
    pub token_out: Wad,
    pub spot_price: Wad,
    pub buy_anchor: Wad,
    pub sell_anchor: Wad,
    pub lp_change: Option<LpChange>,
    pub timestamp: Timestamp,
}

impl PoolDelta {
    /// Delta that restores `before` once `self` has been applied on top of it
    pub fn reverting(&self, before: &PoolState) -> PoolDelta {
        PoolDelta {
            eth_in: self.eth_out,
            eth_out: self.eth_in,
            token_in: self.token_out,
            token_out: self.token_in,
            spot_price: before.spot_price,
            buy_anchor: before.buy_anchor,
            sell_anchor: before.sell_anchor,
            lp_change: self.lp_change.as_ref().map(LpChange::inverse),
            timestamp: before.last_update_ts,
        }
    }
}

impl PoolState {
    /// Create a pool with anchors on spot. When both reserves are non-zero the
    /// provider receives `sqrt(eth * token)` LP tokens.
    pub fn new(
        pair: TokenPair,
        eth_reserve: Wad,
        token_reserve: Wad,
        spot_price: Wad,
        relaxation_rate: RelaxationRate,
        provider: &str,
        timestamp: Timestamp,
    ) -> Result<Self> {
        if pair.base.is_eth() {
            return Err(EngineError::InvalidRequest("base token cannot be ETH".into()));
        }

        let mut lp_balances = BTreeMap::new();
        let lp_total_supply = if eth_reserve.is_zero() || token_reserve.is_zero() {
            Wad::ZERO
        } else {
            let initial = initial_liquidity(eth_reserve, token_reserve)?;
            lp_balances.insert(provider.to_string(), initial);
            initial
        };

        let state = Self {
            pool_id: pair.pool_id(),
            pair,
            eth_reserve,
            token_reserve,
            spot_price,
            buy_anchor: spot_price,
            sell_anchor: spot_price,
            last_update_ts: timestamp,
            relaxation_rate,
            lp_total_supply,
            lp_balances,
            version: 0,
        };
        state.validate()?;
        Ok(state)
    }

    /// Seed displaced anchors at creation
    pub fn with_anchors(mut self, buy_anchor: Wad, sell_anchor: Wad) -> Result<Self> {
        self.buy_anchor = buy_anchor;
        self.sell_anchor = sell_anchor;
        self.validate()?;
        Ok(self)
    }

    // ========== ACCESSORS ==========

    pub fn pool_id(&self) -> &PoolId {
        &self.pool_id
    }

    pub fn pair(&self) -> &TokenPair {
        &self.pair
    }

    pub fn eth_reserve(&self) -> Wad {
        self.eth_reserve
    }

    pub fn token_reserve(&self) -> Wad {
        self.token_reserve
    }

    pub fn spot_price(&self) -> Wad {
        self.spot_price
    }

    /// Stored buy anchor, as of `last_update_ts`
    pub fn buy_anchor(&self) -> Wad {
        self.buy_anchor
    }

    /// Stored sell anchor, as of `last_update_ts`
    pub fn sell_anchor(&self) -> Wad {
        self.sell_anchor
    }

    pub fn last_update_ts(&self) -> Timestamp {
        self.last_update_ts
    }

    pub fn relaxation_rate(&self) -> RelaxationRate {
        self.relaxation_rate
    }

    pub fn lp_total_supply(&self) -> Wad {
        self.lp_total_supply
    }

    pub fn lp_balance(&self, account: &str) -> Wad {
        self.lp_balances.get(account).copied().unwrap_or(Wad::ZERO)
    }

    pub fn lp_accounts(&self) -> impl Iterator<Item = (&AccountId, &Wad)> {
        self.lp_balances.iter()
    }

    /// Fraction of the pool owned by `account`
    pub fn share_of(&self, account: &str) -> Result<Decimal> {
        if self.lp_total_supply.is_zero() {
            return Ok(Decimal::ZERO);
        }
        Ok(self.lp_balance(account).to_decimal()? / self.lp_total_supply.to_decimal()?)
    }

    /// Incremented on every mutation
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn has_liquidity(&self) -> bool {
        !self.eth_reserve.is_zero() && !self.token_reserve.is_zero()
    }

    /// Tokens per ETH implied by the reserves
    pub fn reserve_ratio(&self) -> Result<Option<Decimal>> {
        if !self.has_liquidity() {
            return Ok(None);
        }
        Ok(Some(self.token_reserve.to_decimal()? / self.eth_reserve.to_decimal()?))
    }

    /// Anchors relaxed from `last_update_ts` to `now`
    pub fn effective_prices(&self, now: Timestamp) -> Result<EffectivePrices> {
        let spot = self.spot_price.to_decimal()?;
        let elapsed = elapsed_secs(self.last_update_ts, now);
        Ok(EffectivePrices {
            buy: relax(self.buy_anchor.to_decimal()?, spot, elapsed, self.relaxation_rate),
            spot,
            sell: relax(self.sell_anchor.to_decimal()?, spot, elapsed, self.relaxation_rate),
        })
    }

    // ========== MUTATION ==========

    /// Candidate state after `delta`, validated but not committed
    pub fn preview(&self, delta: &PoolDelta) -> Result<PoolState> {
        let mut next = self.clone();

        next.eth_reserve = self
            .eth_reserve
            .checked_add(delta.eth_in)
            .and_then(|reserve| reserve.checked_sub(delta.eth_out))
            .ok_or_else(|| EngineError::invariant(format!("{}: ETH reserve would go negative", self.pool_id)))?;
        next.token_reserve = self
            .token_reserve
            .checked_add(delta.token_in)
            .and_then(|reserve| reserve.checked_sub(delta.token_out))
            .ok_or_else(|| EngineError::invariant(format!("{}: token reserve would go negative", self.pool_id)))?;

        next.spot_price = delta.spot_price;
        next.buy_anchor = delta.buy_anchor;
        next.sell_anchor = delta.sell_anchor;
        next.last_update_ts = delta.timestamp;

        if let Some(change) = &delta.lp_change {
            next.apply_lp_change(change)?;
        }

        next.version = self.version + 1;
        next.validate()?;
        Ok(next)
    }

    /// The sole mutator. Leaves the state untouched if the result would break
    /// an invariant.
    pub fn apply_trade(&mut self, delta: &PoolDelta) -> Result<()> {
        let next = self.preview(delta)?;
        *self = next;
        Ok(())
    }

    fn apply_lp_change(&mut self, change: &LpChange) -> Result<()> {
        match change {
            LpChange::Mint { account, amount } => {
                let balance = self.lp_balance(account);
                let balance = balance
                    .checked_add(*amount)
                    .ok_or_else(|| EngineError::invariant("LP balance overflow"))?;
                self.lp_balances.insert(account.clone(), balance);
                self.lp_total_supply = self
                    .lp_total_supply
                    .checked_add(*amount)
                    .ok_or_else(|| EngineError::invariant("LP supply overflow"))?;
            }
            LpChange::Burn { account, amount } => {
                let balance = self
                    .lp_balance(account)
                    .checked_sub(*amount)
                    .ok_or_else(|| EngineError::invariant(format!("burn exceeds LP balance of {}", account)))?;
                if balance.is_zero() {
                    self.lp_balances.remove(account);
                } else {
                    self.lp_balances.insert(account.clone(), balance);
                }
                self.lp_total_supply = self
                    .lp_total_supply
                    .checked_sub(*amount)
                    .ok_or_else(|| EngineError::invariant("burn exceeds LP supply"))?;
            }
        }
        Ok(())
    }

    /// Check anchor ordering, positive prices and LP conservation
    pub fn validate(&self) -> Result<()> {
        if self.spot_price.is_zero() {
            return Err(EngineError::invariant(format!("{}: spot price is zero", self.pool_id)));
        }
        if self.sell_anchor.is_zero() {
            return Err(EngineError::invariant(format!("{}: sell anchor is zero", self.pool_id)));
        }
        if self.buy_anchor < self.spot_price {
            return Err(EngineError::invariant(format!(
                "{}: buy anchor {} below spot {}",
                self.pool_id, self.buy_anchor, self.spot_price
            )));
        }
        if self.sell_anchor > self.spot_price {
            return Err(EngineError::invariant(format!(
                "{}: sell anchor {} above spot {}",
                self.pool_id, self.sell_anchor, self.spot_price
            )));
        }

        let mut balances = Wad::ZERO;
        for balance in self.lp_balances.values() {
            balances = balances
                .checked_add(*balance)
                .ok_or_else(|| EngineError::invariant("LP balances overflow"))?;
        }
        if balances != self.lp_total_supply {
            return Err(EngineError::invariant(format!(
                "{}: LP balances {} != total supply {}",
                self.pool_id, balances, self.lp_total_supply
            )));
        }

        Ok(())
    }
}

/// `sqrt(eth * token)` LP tokens for the first liquidity in a pool
pub fn initial_liquidity(eth_amount: Wad, token_amount: Wad) -> Result<Wad> {
    let product = eth_amount
        .to_decimal()?
        .checked_mul(token_amount.to_decimal()?)
        .ok_or_else(|| EngineError::invalid_amount("initial liquidity overflows"))?;
    let root = product
        .sqrt()
        .ok_or_else(|| EngineError::invalid_amount("initial liquidity has no square root"))?;
    Wad::from_decimal(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokenInfo;
    use rust_decimal_macros::dec;

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

    fn noop_delta(state: &PoolState, timestamp: Timestamp) -> PoolDelta {
        PoolDelta {
            eth_in: Wad::ZERO,
            eth_out: Wad::ZERO,
            token_in: Wad::ZERO,
            token_out: Wad::ZERO,
            spot_price: state.spot_price(),
            buy_anchor: state.buy_anchor(),
            sell_anchor: state.sell_anchor(),
            lp_change: None,
            timestamp,
        }
    }

    #[test]
    fn test_new_pool_mints_initial_liquidity() {
        let pool = dai_pool();
        assert_eq!(pool.pool_id(), "DAI/ETH");
        assert_eq!(pool.version(), 0);
        assert_eq!(pool.lp_total_supply(), pool.lp_balance("treasury"));
        assert_eq!(pool.share_of("treasury").unwrap(), Decimal::ONE);
        assert_eq!(pool.share_of("nobody").unwrap(), Decimal::ZERO);

        // sqrt(1000 * 3_200_000) ~= 56568.54
        let supply = pool.lp_total_supply().to_decimal().unwrap();
        assert!((supply - dec!(56568.542494923801952067548968)).abs() < dec!(0.000001));
        assert_eq!(pool.reserve_ratio().unwrap(), Some(dec!(3200)));
    }

    #[test]
    fn test_new_pool_anchors_on_spot() {
        let pool = PoolState::new(
            TokenPair::with_eth(TokenInfo::new("DAI")),
            Wad::from_units(10),
            Wad::from_units(32_000),
            Wad::from_units(3200),
            RelaxationRate::NONE,
            "treasury",
            0,
        )
        .unwrap();
        assert_eq!(pool.buy_anchor(), pool.spot_price());
        assert_eq!(pool.sell_anchor(), pool.spot_price());
    }

    #[test]
    fn test_rejects_eth_base_and_crossed_anchors() {
        let eth_pair = TokenPair::with_eth(TokenInfo::eth());
        assert!(PoolState::new(eth_pair, Wad::ZERO, Wad::ZERO, Wad::ONE, RelaxationRate::NONE, "x", 0).is_err());

        let crossed = dai_pool().with_anchors(Wad::from_units(3100), Wad::from_units(3150));
        assert!(matches!(crossed, Err(EngineError::InvariantViolation(_))));
    }

    #[test]
    fn test_effective_prices_relax_with_time() {
        let pool = dai_pool();
        let at_zero = pool.effective_prices(0).unwrap();
        assert_eq!(at_zero.buy, dec!(3250));
        assert_eq!(at_zero.sell, dec!(3150));

        let after_half_life = pool.effective_prices(60_000).unwrap();
        assert!((after_half_life.buy - dec!(3225)).abs() < dec!(0.000001));
        assert!((after_half_life.sell - dec!(3175)).abs() < dec!(0.000001));
        assert_eq!(after_half_life.spot, dec!(3200));
    }

    #[test]
    fn test_apply_trade_updates_and_bumps_version() {
        let mut pool = dai_pool();
        let mut delta = noop_delta(&pool, 5_000);
        delta.eth_in = Wad::from_units(10);
        delta.token_out = Wad::from_units(32_000);
        delta.buy_anchor = Wad::from_units(3300);

        pool.apply_trade(&delta).unwrap();
        assert_eq!(pool.eth_reserve(), Wad::from_units(1010));
        assert_eq!(pool.token_reserve(), Wad::from_units(3_168_000));
        assert_eq!(pool.buy_anchor(), Wad::from_units(3300));
        assert_eq!(pool.last_update_ts(), 5_000);
        assert_eq!(pool.version(), 1);
    }

    #[test]
    fn test_invariant_violation_leaves_state_unchanged() {
        let mut pool = dai_pool();
        let before = pool.clone();

        let mut delta = noop_delta(&pool, 1_000);
        delta.sell_anchor = Wad::from_units(3300);
        assert!(matches!(pool.apply_trade(&delta), Err(EngineError::InvariantViolation(_))));
        assert_eq!(pool, before);

        let mut delta = noop_delta(&pool, 1_000);
        delta.eth_out = Wad::from_units(1001);
        assert!(matches!(pool.apply_trade(&delta), Err(EngineError::InvariantViolation(_))));
        assert_eq!(pool, before);

        let mut delta = noop_delta(&pool, 1_000);
        delta.lp_change = Some(LpChange::Burn {
            account: "mallory".into(),
            amount: Wad::from_units(1),
        });
        assert!(matches!(pool.apply_trade(&delta), Err(EngineError::InvariantViolation(_))));
        assert_eq!(pool, before);
    }

    #[test]
    fn test_lp_mint_and_burn_conserve_supply() {
        let mut pool = dai_pool();
        let supply = pool.lp_total_supply();

        let mut delta = noop_delta(&pool, 1_000);
        delta.lp_change = Some(LpChange::Mint {
            account: "alice".into(),
            amount: Wad::from_units(100),
        });
        pool.apply_trade(&delta).unwrap();
        assert_eq!(pool.lp_balance("alice"), Wad::from_units(100));
        assert_eq!(pool.lp_total_supply(), supply.checked_add(Wad::from_units(100)).unwrap());

        let mut delta = noop_delta(&pool, 2_000);
        delta.lp_change = Some(LpChange::Burn {
            account: "alice".into(),
            amount: Wad::from_units(100),
        });
        pool.apply_trade(&delta).unwrap();
        assert_eq!(pool.lp_balance("alice"), Wad::ZERO);
        assert_eq!(pool.lp_accounts().count(), 1);
        assert_eq!(pool.lp_total_supply(), supply);
    }

    #[test]
    fn test_reverting_delta_restores_market_state() {
        let mut pool = dai_pool();
        let before = pool.clone();

        let mut delta = noop_delta(&pool, 9_000);
        delta.token_in = Wad::from_units(3150);
        delta.eth_out = Wad::from_units(1);
        delta.sell_anchor = Wad::from_units(3100);
        pool.apply_trade(&delta).unwrap();

        pool.apply_trade(&delta.reverting(&before)).unwrap();
        assert_eq!(pool.eth_reserve(), before.eth_reserve());
        assert_eq!(pool.token_reserve(), before.token_reserve());
        assert_eq!(pool.sell_anchor(), before.sell_anchor());
        assert_eq!(pool.last_update_ts(), before.last_update_ts());
        assert_eq!(pool.version(), before.version() + 2);
    }
}
