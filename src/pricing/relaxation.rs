//! Exponential relaxation of a displaced anchor back toward spot.
//!
//! `effective = spot + (anchor - spot) * exp(-rate * elapsed)`
//!
//! Decay composes exactly: relaxing for `t1` and then for `t2` equals one
//! relaxation over `t1 + t2`, which lets the engine materialise anchors at any
//! mutation without changing later prices.

use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::types::{EngineError, Result, Timestamp};

pub const LN_2: Decimal = dec!(0.6931471805599453094172321215);

/// exp(-40) is below 5e-18; past this point the anchor sits on spot.
pub const MAX_DECAY_EXPONENT: Decimal = dec!(40);

const EXP_TOLERANCE: Decimal = dec!(0.0000000000000000000000001);
const MAX_REDUCED_EXPONENT: Decimal = dec!(0.5);

/// Decay rate per second
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelaxationRate(Decimal);

impl RelaxationRate {
    pub const NONE: RelaxationRate = RelaxationRate(Decimal::ZERO);

    pub fn per_second(rate: Decimal) -> Result<Self> {
        if rate.is_sign_negative() && !rate.is_zero() {
            return Err(EngineError::Config(format!("relaxation rate {} is negative", rate)));
        }
        Ok(Self(rate))
    }

    /// Rate at which the anchor gap halves every `half_life_secs`
    pub fn from_half_life(half_life_secs: Decimal) -> Result<Self> {
        if half_life_secs <= Decimal::ZERO {
            return Err(EngineError::Config(format!(
                "relaxation half-life {}s must be positive",
                half_life_secs
            )));
        }
        Ok(Self(LN_2 / half_life_secs))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn half_life_secs(&self) -> Option<Decimal> {
        if self.is_zero() {
            None
        } else {
            Some(LN_2 / self.0)
        }
    }
}

/// Seconds between two millisecond timestamps, zero if `to` is not after `from`
pub fn elapsed_secs(from: Timestamp, to: Timestamp) -> Decimal {
    if to <= from {
        return Decimal::ZERO;
    }
    Decimal::from(to - from) / Decimal::ONE_THOUSAND
}

/// Relax `anchor` toward `spot` over `elapsed_secs` at `rate`.
///
/// The result always lies in the closed interval between `spot` and `anchor`.
pub fn relax(anchor: Decimal, spot: Decimal, elapsed_secs: Decimal, rate: RelaxationRate) -> Decimal {
    if elapsed_secs <= Decimal::ZERO || rate.is_zero() || anchor == spot {
        return anchor;
    }

    let exponent = match rate.value().checked_mul(elapsed_secs) {
        Some(exponent) if exponent < MAX_DECAY_EXPONENT => exponent,
        _ => return spot,
    };

    let factor = match decay_factor(exponent) {
        Some(factor) => factor,
        None => return spot,
    };

    let relaxed = spot + (anchor - spot) * factor;
    if anchor > spot {
        relaxed.clamp(spot, anchor)
    } else {
        relaxed.clamp(anchor, spot)
    }
}

/// exp(-x) for 0 <= x < MAX_DECAY_EXPONENT.
///
/// The series only converges quickly for small arguments, so x is halved
/// until it is below 0.5 and the result squared back up.
fn decay_factor(exponent: Decimal) -> Option<Decimal> {
    let mut reduced = exponent;
    let mut squarings = 0u32;
    while reduced > MAX_REDUCED_EXPONENT {
        reduced /= Decimal::TWO;
        squarings += 1;
    }

    let mut growth = reduced.checked_exp_with_tolerance(EXP_TOLERANCE)?;
    for _ in 0..squarings {
        growth = growth.checked_mul(growth)?;
    }

    Decimal::ONE.checked_div(growth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn half_life_60() -> RelaxationRate {
        RelaxationRate::from_half_life(dec!(60)).unwrap()
    }

    fn close(a: Decimal, b: Decimal, tolerance: Decimal) -> bool {
        (a - b).abs() <= tolerance
    }

    #[test]
    fn test_half_life_halves_gap() {
        let relaxed = relax(dec!(3250), dec!(3200), dec!(60), half_life_60());
        assert!(close(relaxed, dec!(3225), dec!(0.000001)), "relaxed = {}", relaxed);

        let relaxed = relax(dec!(3150), dec!(3200), dec!(120), half_life_60());
        assert!(close(relaxed, dec!(3187.5), dec!(0.000001)), "relaxed = {}", relaxed);
    }

    #[test]
    fn test_no_elapsed_or_rate_keeps_anchor() {
        assert_eq!(relax(dec!(3250), dec!(3200), Decimal::ZERO, half_life_60()), dec!(3250));
        assert_eq!(relax(dec!(3250), dec!(3200), dec!(-5), half_life_60()), dec!(3250));
        assert_eq!(relax(dec!(3250), dec!(3200), dec!(600), RelaxationRate::NONE), dec!(3250));
    }

    #[test]
    fn test_large_elapsed_lands_on_spot() {
        assert_eq!(relax(dec!(3250), dec!(3200), dec!(1000000), half_life_60()), dec!(3200));
        assert_eq!(relax(dec!(3150), dec!(3200), dec!(1000000), half_life_60()), dec!(3200));
    }

    #[test]
    fn test_rate_from_half_life_round_trips() {
        let rate = half_life_60();
        assert!(close(rate.half_life_secs().unwrap(), dec!(60), dec!(0.0000000001)));
        assert!(RelaxationRate::from_half_life(Decimal::ZERO).is_err());
        assert!(RelaxationRate::per_second(dec!(-0.1)).is_err());
        assert_eq!(RelaxationRate::NONE.half_life_secs(), None);
    }

    #[test]
    fn test_elapsed_secs() {
        assert_eq!(elapsed_secs(1_000, 61_000), dec!(60));
        assert_eq!(elapsed_secs(5_000, 1_000), Decimal::ZERO);
        assert_eq!(elapsed_secs(0, 1_500), dec!(1.5));
    }

    proptest! {
        #[test]
        fn prop_relaxed_between_spot_and_anchor(
            spot in 1u64..1_000_000,
            gap in 0i64..100_000,
            above in any::<bool>(),
            elapsed in 0u64..100_000,
        ) {
            let spot = Decimal::from(spot);
            let gap = Decimal::from(gap);
            let anchor = if above { spot + gap } else { (spot - gap).max(Decimal::ONE) };
            let relaxed = relax(anchor, spot, Decimal::from(elapsed), half_life_60());

            prop_assert!(relaxed >= spot.min(anchor));
            prop_assert!(relaxed <= spot.max(anchor));
        }

        #[test]
        fn prop_distance_shrinks_with_time(
            gap in 1i64..10_000,
            t1 in 0u64..5_000,
            dt in 0u64..5_000,
        ) {
            let spot = dec!(3200);
            let anchor = spot + Decimal::from(gap);
            let early = relax(anchor, spot, Decimal::from(t1), half_life_60());
            let late = relax(anchor, spot, Decimal::from(t1 + dt), half_life_60());

            prop_assert!((late - spot).abs() <= (early - spot).abs());
        }

        #[test]
        fn prop_relaxation_composes(
            gap in 1i64..10_000,
            t1 in 0u64..1_200,
            t2 in 0u64..1_200,
        ) {
            let spot = dec!(3200);
            let anchor = spot + Decimal::from(gap);
            let rate = half_life_60();

            let stepped = relax(relax(anchor, spot, Decimal::from(t1), rate), spot, Decimal::from(t2), rate);
            let direct = relax(anchor, spot, Decimal::from(t1 + t2), rate);

            prop_assert!(close(stepped, direct, dec!(0.000000001)), "stepped {} direct {}", stepped, direct);
        }
    }
}
