use rust_decimal::Decimal;

use crate::types::{EngineError, Result, Wad};

/// Relative shortfall of `actual` against `expected` as a fraction (never negative)
pub fn calculate_slippage(expected_output: Decimal, actual_output: Decimal) -> Decimal {
    if expected_output <= Decimal::ZERO || actual_output >= expected_output {
        return Decimal::ZERO;
    }
    (expected_output - actual_output) / expected_output
}

/// Minimum acceptable output for `expected_output` under `slippage_tolerance`
/// (a fraction in [0, 1]), rounded down
pub fn apply_slippage_tolerance(expected_output: Wad, slippage_tolerance: Decimal) -> Result<Wad> {
    if slippage_tolerance.is_sign_negative() || slippage_tolerance > Decimal::ONE {
        return Err(EngineError::invalid_amount(format!(
            "slippage tolerance {} outside [0, 1]",
            slippage_tolerance
        )));
    }
    let expected = expected_output.to_decimal()?;
    Wad::from_decimal(expected * (Decimal::ONE - slippage_tolerance))
}

/// |observed / reference - 1|
pub fn relative_deviation(observed: Decimal, reference: Decimal) -> Result<Decimal> {
    if reference <= Decimal::ZERO {
        return Err(EngineError::invalid_amount("reference value must be positive"));
    }
    let ratio = observed
        .checked_div(reference)
        .ok_or_else(|| EngineError::invalid_amount(format!("{} / {} overflows", observed, reference)))?;
    Ok((ratio - Decimal::ONE).abs())
}

pub fn to_percent(fraction: Decimal) -> Decimal {
    fraction * Decimal::ONE_HUNDRED
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_slippage() {
        assert_eq!(calculate_slippage(dec!(100), dec!(99)), dec!(0.01));
        assert_eq!(calculate_slippage(dec!(100), dec!(101)), Decimal::ZERO);
        assert_eq!(calculate_slippage(Decimal::ZERO, dec!(1)), Decimal::ZERO);
    }

    #[test]
    fn test_apply_slippage_tolerance() {
        let min_out = apply_slippage_tolerance(Wad::from_units(1000), dec!(0.005)).unwrap();
        assert_eq!(min_out, Wad::from_units(995));
        assert!(apply_slippage_tolerance(Wad::from_units(1), dec!(1.5)).is_err());
    }

    #[test]
    fn test_relative_deviation() {
        assert_eq!(relative_deviation(dec!(3520), dec!(3200)).unwrap(), dec!(0.1));
        assert_eq!(relative_deviation(dec!(2880), dec!(3200)).unwrap(), dec!(0.1));
        assert!(relative_deviation(dec!(1), Decimal::ZERO).is_err());
        assert_eq!(to_percent(dec!(0.1)), dec!(10.0));
    }
}
