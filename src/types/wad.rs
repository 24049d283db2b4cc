use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{EngineError, Result};

pub const WAD_DECIMALS: u32 = 18;
const WAD_SCALE: u128 = 1_000_000_000_000_000_000;

/// Non-negative fixed-point quantity with 18 implied decimals.
///
/// Reserves, prices and LP supply are stored as `Wad` at the pool boundary.
/// Arithmetic runs on `Decimal`; conversion back truncates toward zero so the
/// pool never pays out more than it computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Wad(u128);

impl Wad {
    pub const ZERO: Wad = Wad(0);
    pub const ONE: Wad = Wad(WAD_SCALE);

    pub const fn from_raw(raw: u128) -> Self {
        Self(raw)
    }

    /// Whole token units, eg `Wad::from_units(1000)` is 1000 ETH
    pub const fn from_units(units: u64) -> Self {
        Self(units as u128 * WAD_SCALE)
    }

    pub const fn raw(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Wad) -> Option<Wad> {
        self.0.checked_add(other.0).map(Wad)
    }

    pub fn checked_sub(self, other: Wad) -> Option<Wad> {
        self.0.checked_sub(other.0).map(Wad)
    }

    /// Whole and fractional parts convert separately so values beyond the
    /// 96-bit `Decimal` mantissa at scale 18 still fit; past 28 significant
    /// digits the lowest fractional digits are rounded away.
    pub fn to_decimal(&self) -> Result<Decimal> {
        let whole = Decimal::try_from_i128_with_scale(split_raw(self.0 / WAD_SCALE)?, 0)?;
        let frac = Decimal::try_from_i128_with_scale(split_raw(self.0 % WAD_SCALE)?, WAD_DECIMALS)?;
        whole
            .checked_add(frac)
            .map(|value| value.normalize())
            .ok_or_else(|| EngineError::invalid_amount(format!("{} raw units overflow", self.0)))
    }

    /// Convert a decimal into WAD, truncating digits beyond the 18th decimal.
    pub fn from_decimal(value: Decimal) -> Result<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(EngineError::invalid_amount(format!("{} is negative", value)));
        }

        let overflow = || EngineError::invalid_amount(format!("{} overflows WAD", value));
        let whole = value.trunc().to_u128().ok_or_else(overflow)?;
        let frac = (value.fract() * Decimal::from(WAD_SCALE as u64))
            .trunc()
            .to_u128()
            .ok_or_else(overflow)?;

        whole
            .checked_mul(WAD_SCALE)
            .and_then(|raw| raw.checked_add(frac))
            .map(Wad)
            .ok_or_else(overflow)
    }
}

fn split_raw(part: u128) -> Result<i128> {
    i128::try_from(part).map_err(|_| EngineError::invalid_amount(format!("{} raw units overflow", part)))
}

impl fmt::Display for Wad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / WAD_SCALE;
        let frac = self.0 % WAD_SCALE;
        if frac == 0 {
            return write!(f, "{}", whole);
        }
        let frac = format!("{:018}", frac);
        write!(f, "{}.{}", whole, frac.trim_end_matches('0'))
    }
}
