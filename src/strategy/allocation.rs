//! Allocation vectors: fractional capital splits aligned to a venue list.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::utils::decimal::{checked_sum, clamp, safe_div, saturating_sum, FRACTION_DP};

/// Fractions of managed capital per venue, in the strategy's venue order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationVector(Vec<Decimal>);

impl AllocationVector {
    pub fn new(fractions: Vec<Decimal>) -> Self {
        Self(fractions)
    }

    /// Fractions from absolute per-venue amounts. `None` when nothing is deployed.
    pub fn from_amounts(amounts: &[Decimal]) -> Option<Self> {
        let total = saturating_sum(amounts.iter().copied());
        if total <= Decimal::ZERO {
            return None;
        }
        Some(Self(amounts.to_vec()).renormalized(&Self(Vec::new())))
    }

    /// Allocation proportional to `scores`; negative scores count as zero.
    ///
    /// Returns `fallback` unchanged when every score is zero.
    pub fn from_scores(scores: &[Decimal], fallback: &AllocationVector) -> Self {
        let positive: Vec<Decimal> = scores.iter().map(|s| (*s).max(Decimal::ZERO)).collect();
        Self(positive).renormalized(fallback)
    }

    pub fn as_slice(&self) -> &[Decimal] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Decimal {
        self.0.get(index).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Decimal> {
        self.0.iter()
    }

    pub fn sum(&self) -> Decimal {
        saturating_sum(self.0.iter().copied())
    }

    /// Multiply one entry by `factor`. Out-of-range indices are ignored.
    pub fn scale(&mut self, index: usize, factor: Decimal) {
        if let Some(value) = self.0.get_mut(index) {
            *value *= factor;
        }
    }

    /// Clamp each entry into its `[min, max]` bounds.
    pub fn clamped(&self, min: &[Decimal], max: &[Decimal]) -> Self {
        Self(
            self.0
                .iter()
                .enumerate()
                .map(|(i, w)| {
                    let lo = min.get(i).copied().unwrap_or(Decimal::ZERO);
                    let hi = max.get(i).copied().unwrap_or(Decimal::ONE);
                    clamp(*w, lo, hi)
                })
                .collect(),
        )
    }

    /// Cap every entry at `limit`, handing the excess to uncapped entries in
    /// proportion to their weight. Zero entries stay zero.
    pub fn capped(&self, limit: Decimal) -> Self {
        let mut weights = self.0.clone();
        for _ in 0..weights.len() {
            let excess: Decimal = weights
                .iter()
                .map(|w| (*w - limit).max(Decimal::ZERO))
                .sum();
            if excess == Decimal::ZERO {
                break;
            }
            let free: Decimal = weights.iter().filter(|w| **w < limit).copied().sum();
            for w in weights.iter_mut() {
                if *w > limit {
                    *w = limit;
                }
            }
            if free <= Decimal::ZERO {
                break;
            }
            for w in weights.iter_mut() {
                if *w < limit {
                    *w += excess * *w / free;
                }
            }
        }
        Self(weights)
    }

    /// Rescale so the fractions sum to exactly one.
    ///
    /// Each entry is rounded to `FRACTION_DP` places and the rounding residual
    /// goes to the largest entry. Returns `fallback` when the sum is not positive.
    pub fn renormalized(&self, fallback: &AllocationVector) -> Self {
        // Scores too large to sum are shrunk first; only the ratios matter
        let weights = match checked_sum(self.0.iter().copied()) {
            Some(_) => self.0.clone(),
            None => {
                let count = Decimal::from(self.0.len() as u64);
                self.0.iter().map(|w| *w / count).collect()
            }
        };
        let total = saturating_sum(weights.iter().copied());
        if total <= Decimal::ZERO {
            return fallback.clone();
        }

        let mut fractions: Vec<Decimal> = weights
            .iter()
            .map(|w| safe_div(*w, total).round_dp(FRACTION_DP))
            .collect();

        let residual = Decimal::ONE - fractions.iter().copied().sum::<Decimal>();
        if residual != Decimal::ZERO {
            if let Some(largest) = fractions
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))
                .map(|(i, _)| i)
            {
                fractions[largest] += residual;
            }
        }

        Self(fractions)
    }

    /// Sum of absolute per-venue differences.
    pub fn deviation(&self, other: &AllocationVector) -> Decimal {
        let len = self.len().max(other.len());
        (0..len)
            .map(|i| (self.get(i) - other.get(i)).abs())
            .sum()
    }
}

impl From<Vec<Decimal>> for AllocationVector {
    fn from(fractions: Vec<Decimal>) -> Self {
        Self(fractions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_renormalize_sums_to_exactly_one() {
        let v = AllocationVector::new(vec![dec!(1), dec!(1), dec!(1)]);
        let fallback = AllocationVector::new(vec![dec!(1), dec!(0), dec!(0)]);

        let normalized = v.renormalized(&fallback);

        assert_eq!(normalized.sum(), Decimal::ONE);
        assert!(normalized.get(0) > dec!(0.3333) && normalized.get(0) < dec!(0.3334));
    }

    #[test]
    fn test_zero_scores_fall_back() {
        let fallback = AllocationVector::new(vec![dec!(0.6), dec!(0.4)]);
        let v = AllocationVector::from_scores(&[Decimal::ZERO, dec!(-3)], &fallback);
        assert_eq!(v, fallback);
    }

    #[test]
    fn test_from_amounts() {
        let v = AllocationVector::from_amounts(&[dec!(500), dec!(1500)]).unwrap();
        assert_eq!(v.as_slice(), &[dec!(0.25), dec!(0.75)]);
        assert!(AllocationVector::from_amounts(&[Decimal::ZERO, Decimal::ZERO]).is_none());
    }

    #[test]
    fn test_deviation_is_sum_of_abs_differences() {
        let current = AllocationVector::new(vec![dec!(0.5), dec!(0.5)]);
        let target = AllocationVector::new(vec![dec!(0.6), dec!(0.4)]);
        assert_eq!(current.deviation(&target), dec!(0.2));
    }

    #[test]
    fn test_clamp_and_cap() {
        let v = AllocationVector::new(vec![dec!(0.9), dec!(0.05), dec!(0.05)]);
        let clamped = v.clamped(&[dec!(0), dec!(0.1), dec!(0)], &[dec!(0.7), dec!(1), dec!(1)]);
        assert_eq!(clamped.as_slice(), &[dec!(0.7), dec!(0.1), dec!(0.05)]);
        assert_eq!(
            v.capped(dec!(0.5)).as_slice(),
            &[dec!(0.5), dec!(0.25), dec!(0.25)]
        );
    }
}
