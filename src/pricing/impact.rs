use rust_decimal::Decimal;

use crate::{types::{EngineError, Result}, utils::config::EngineConfig};

/// Computes the fractional price worsening for a trade of `amount` against a
/// pool side holding `reference_reserve`.
pub trait PriceImpactModel: Send + Sync {
    fn impact(&self, amount: Decimal, reference_reserve: Decimal) -> Result<Decimal>;

    /// Upper bound of any value returned by `impact`
    fn cap(&self) -> Decimal;
}

/// `impact = min(cap, amount / reference_reserve * sensitivity)`
#[derive(Debug, Clone, PartialEq)]
pub struct LinearImpactModel {
    cap: Decimal,
    sensitivity: Decimal,
}

impl LinearImpactModel {
    pub fn new(cap: Decimal, sensitivity: Decimal) -> Result<Self> {
        if cap <= Decimal::ZERO || cap >= Decimal::ONE {
            return Err(EngineError::Config(format!("impact cap {} must be in (0, 1)", cap)));
        }
        if sensitivity.is_sign_negative() {
            return Err(EngineError::Config(format!("impact sensitivity {} is negative", sensitivity)));
        }
        Ok(Self { cap, sensitivity })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Self::new(config.impact_cap, config.impact_sensitivity)
    }
}

impl PriceImpactModel for LinearImpactModel {
    fn impact(&self, amount: Decimal, reference_reserve: Decimal) -> Result<Decimal> {
        impact(amount, reference_reserve, self.cap, self.sensitivity)
    }

    fn cap(&self) -> Decimal {
        self.cap
    }
}

pub fn impact(amount: Decimal, reference_reserve: Decimal, cap: Decimal, sensitivity: Decimal) -> Result<Decimal> {
    if amount <= Decimal::ZERO {
        return Err(EngineError::invalid_amount(format!("trade amount {} must be positive", amount)));
    }
    if reference_reserve <= Decimal::ZERO {
        return Err(EngineError::invalid_amount("reference reserve must be positive"));
    }

    let raw = amount
        .checked_div(reference_reserve)
        .and_then(|ratio| ratio.checked_mul(sensitivity))
        .ok_or_else(|| EngineError::invalid_amount(format!("impact of {} overflows", amount)))?;

    Ok(raw.min(cap))
}

/// Tokens received for `eth_in` at `effective_price` tokens per ETH
pub fn quote_buy(eth_in: Decimal, effective_price: Decimal, impact: Decimal) -> Result<Decimal> {
    ensure_quote_inputs(eth_in, effective_price, impact)?;
    let out = eth_in
        .checked_mul(effective_price)
        .and_then(|gross| gross.checked_mul(Decimal::ONE - impact))
        .ok_or_else(|| EngineError::invalid_amount(format!("buy of {} ETH overflows", eth_in)))?;
    ensure_positive_output(out)
}

/// ETH received for `token_in` at `effective_price` tokens per ETH
pub fn quote_sell(token_in: Decimal, effective_price: Decimal, impact: Decimal) -> Result<Decimal> {
    ensure_quote_inputs(token_in, effective_price, impact)?;
    let out = token_in
        .checked_div(effective_price)
        .and_then(|gross| gross.checked_mul(Decimal::ONE - impact))
        .ok_or_else(|| EngineError::invalid_amount(format!("sell of {} tokens overflows", token_in)))?;
    ensure_positive_output(out)
}

fn ensure_quote_inputs(amount_in: Decimal, effective_price: Decimal, impact: Decimal) -> Result<()> {
    if amount_in <= Decimal::ZERO {
        return Err(EngineError::invalid_amount(format!("amount in {} must be positive", amount_in)));
    }
    if effective_price <= Decimal::ZERO {
        return Err(EngineError::invariant(format!("effective price {} is not positive", effective_price)));
    }
    if impact.is_sign_negative() || impact >= Decimal::ONE {
        return Err(EngineError::invariant(format!("impact {} outside [0, 1)", impact)));
    }
    Ok(())
}

fn ensure_positive_output(out: Decimal) -> Result<Decimal> {
    if out <= Decimal::ZERO {
        return Err(EngineError::invalid_amount("trade too small to produce any output"));
    }
    Ok(out)
}
