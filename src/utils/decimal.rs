//! Decimal arithmetic utilities for allocation math.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Precision used for allocation fractions.
pub const FRACTION_DP: u32 = 18;

/// Calculate basis points (1 bp = 0.01%)
pub fn to_basis_points(rate: Decimal) -> Decimal {
    rate * dec!(10000)
}

/// Safe division that returns zero if divisor is zero.
///
/// A quotient outside the representable range saturates.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        return Decimal::ZERO;
    }
    numerator.checked_div(denominator).unwrap_or_else(|| {
        if numerator.is_sign_negative() == denominator.is_sign_negative() {
            Decimal::MAX
        } else {
            Decimal::MIN
        }
    })
}

/// Sum, or `None` if it leaves the representable range.
pub fn checked_sum(values: impl IntoIterator<Item = Decimal>) -> Option<Decimal> {
    values
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, value| acc.checked_add(value))
}

/// Sum that saturates instead of overflowing.
pub fn saturating_sum(values: impl IntoIterator<Item = Decimal>) -> Decimal {
    values.into_iter().fold(Decimal::ZERO, Decimal::saturating_add)
}

/// Clamp a value into `[lo, hi]`.
pub fn clamp(value: Decimal, lo: Decimal, hi: Decimal) -> Decimal {
    value.max(lo).min(hi)
}

/// Arithmetic mean, zero for an empty slice.
pub fn mean(values: &[Decimal]) -> Decimal {
    if values.is_empty() {
        return Decimal::ZERO;
    }
    let count = Decimal::from(values.len() as u64);
    match checked_sum(values.iter().copied()) {
        Some(sum) => sum / count,
        None => saturating_sum(values.iter().map(|v| *v / count)),
    }
}

/// Square root via f64; negative or unrepresentable input yields zero.
pub fn sqrt(value: Decimal) -> Decimal {
    if value <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let root = value.to_f64().unwrap_or(0.0).sqrt();
    Decimal::from_f64(root)
        .map(|d| d.round_dp(FRACTION_DP))
        .unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basis_points() {
        assert_eq!(to_basis_points(dec!(0.0001)), dec!(1)); // 0.01% = 1 bp
        assert_eq!(to_basis_points(dec!(0.05)), dec!(500));
    }

    #[test]
    fn test_safe_div_by_zero() {
        assert_eq!(safe_div(dec!(5), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(safe_div(dec!(5), dec!(2)), dec!(2.5));
    }

    #[test]
    fn test_clamp() {
        assert_eq!(clamp(dec!(0.7), dec!(0.1), dec!(0.5)), dec!(0.5));
        assert_eq!(clamp(dec!(0.05), dec!(0.1), dec!(0.5)), dec!(0.1));
        assert_eq!(clamp(dec!(0.3), dec!(0.1), dec!(0.5)), dec!(0.3));
    }

    #[test]
    fn test_mean_and_sqrt() {
        assert_eq!(mean(&[dec!(1), dec!(2), dec!(3)]), dec!(2));
        assert_eq!(mean(&[]), Decimal::ZERO);
        assert_eq!(sqrt(dec!(4)), dec!(2));
        assert_eq!(sqrt(dec!(-1)), Decimal::ZERO);
        assert_eq!(sqrt(dec!(0.25)), dec!(0.5));
    }

    #[test]
    fn test_large_values_saturate() {
        assert_eq!(safe_div(Decimal::MAX, dec!(0.5)), Decimal::MAX);
        assert_eq!(safe_div(Decimal::MAX, dec!(-0.5)), Decimal::MIN);
        assert_eq!(checked_sum([Decimal::MAX, Decimal::ONE]), None);
        assert_eq!(saturating_sum([Decimal::MAX, Decimal::MAX]), Decimal::MAX);
        assert!(mean(&[Decimal::MAX, Decimal::MAX]) >= Decimal::MAX - Decimal::ONE);
    }
}
