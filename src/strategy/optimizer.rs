//! Target allocation scoring.
//!
//! Five interchangeable scorers map venue metrics to a target allocation.
//! Every scorer ends with the same postcondition: clamp to the strategy's
//! per-venue bounds and renormalize to an exact sum of one.

use rust_decimal::Decimal;
use tracing::debug;

use super::{AllocationAlgorithm, AllocationVector, Strategy};
use crate::config::OptimizerConfig;
use crate::market::MarketSnapshot;
use crate::utils::decimal::{clamp, safe_div, saturating_sum};
use crate::venue::{VenueClass, VenueMetrics};

/// Computes target allocations for strategies.
pub struct AllocationOptimizer {
    config: OptimizerConfig,
}

impl AllocationOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Target allocation for `strategy` under the given market conditions.
    ///
    /// `metrics` are matched to the strategy's venues by name; a venue with
    /// no metrics scores zero. Inactive strategies are not scored and get
    /// their static target back.
    pub fn compute_target(
        &self,
        strategy: &Strategy,
        snapshot: &MarketSnapshot,
        metrics: &[VenueMetrics],
    ) -> AllocationVector {
        let fallback = strategy.target();
        if !strategy.active {
            return fallback;
        }

        let aligned = align_metrics(strategy, metrics);

        let raw = match strategy.algorithm {
            AllocationAlgorithm::YieldOptimization => {
                self.proportional(&aligned, &fallback, yield_score)
            }
            AllocationAlgorithm::RiskMinimization => self
                .proportional(&aligned, &fallback, |m| self.risk_score(m))
                .map(|w| w.capped(self.config.max_concentration)),
            AllocationAlgorithm::LiquidityMaximization => {
                self.proportional(&aligned, &fallback, liquidity_score)
            }
            AllocationAlgorithm::ArbitrageCapture => {
                self.proportional(&aligned, &fallback, arbitrage_score)
            }
            AllocationAlgorithm::DynamicHedging => Some(self.hedge(&aligned, &fallback, snapshot)),
        };

        let Some(raw) = raw else {
            debug!(
                strategy_id = strategy.id,
                algorithm = %strategy.algorithm,
                "All venue scores zero, keeping static target"
            );
            return fallback;
        };

        let target = raw
            .clamped(&strategy.min_allocation, &strategy.max_allocation)
            .renormalized(&fallback);

        debug!(
            strategy_id = strategy.id,
            algorithm = %strategy.algorithm,
            target = ?target.as_slice(),
            "Computed target allocation"
        );
        target
    }

    /// Expected yield gained by moving `liquidity` from `current` to `target`.
    pub fn predicted_gain(
        &self,
        strategy: &Strategy,
        current: &AllocationVector,
        target: &AllocationVector,
        metrics: &[VenueMetrics],
        liquidity: Decimal,
    ) -> Decimal {
        saturating_sum(align_metrics(strategy, metrics).iter().enumerate().map(|(i, m)| {
            let venue_yield = m.map(|m| m.current_yield).unwrap_or(Decimal::ZERO);
            (target.get(i) - current.get(i))
                .saturating_mul(venue_yield)
                .saturating_mul(liquidity)
        }))
    }

    /// Allocation proportional to `score`; `None` if every score is zero.
    fn proportional(
        &self,
        aligned: &[Option<&VenueMetrics>],
        fallback: &AllocationVector,
        score: impl Fn(&VenueMetrics) -> Decimal,
    ) -> Option<AllocationVector> {
        let scores: Vec<Decimal> = aligned
            .iter()
            .map(|m| m.map(&score).unwrap_or(Decimal::ZERO).max(Decimal::ZERO))
            .collect();

        if scores.iter().all(|s| *s == Decimal::ZERO) {
            return None;
        }
        Some(AllocationVector::from_scores(&scores, fallback))
    }

    /// Inverse venue risk, bounded by `risk_floor` as risk approaches zero.
    fn risk_score(&self, metrics: &VenueMetrics) -> Decimal {
        safe_div(Decimal::ONE, metrics.risk_score.max(self.config.risk_floor))
    }

    /// Static target tilted by market sentiment and venue class.
    fn hedge(
        &self,
        aligned: &[Option<&VenueMetrics>],
        fallback: &AllocationVector,
        snapshot: &MarketSnapshot,
    ) -> AllocationVector {
        let mut weights = fallback.clone();
        for (i, m) in aligned.iter().enumerate() {
            let Some(m) = m else { continue };
            match m.class {
                VenueClass::Growth if snapshot.bullish => {
                    weights.scale(i, self.config.growth_boost)
                }
                VenueClass::Stable if snapshot.bearish => {
                    weights.scale(i, self.config.stable_boost)
                }
                VenueClass::HighRisk if snapshot.high_volatility => {
                    weights.scale(i, self.config.high_risk_cut)
                }
                _ => {}
            }
        }
        weights
    }
}

/// Metrics for each of the strategy's venues, in venue order.
pub(crate) fn align_metrics<'a>(
    strategy: &Strategy,
    metrics: &'a [VenueMetrics],
) -> Vec<Option<&'a VenueMetrics>> {
    strategy
        .venues
        .iter()
        .map(|venue| metrics.iter().find(|m| &m.venue == venue))
        .collect()
}

fn yield_score(m: &VenueMetrics) -> Decimal {
    safe_div(
        m.current_yield + m.projected_yield,
        Decimal::ONE + m.yield_volatility.max(Decimal::ZERO),
    )
}

fn liquidity_score(m: &VenueMetrics) -> Decimal {
    m.liquidity_depth
        .saturating_mul(Decimal::ONE - clamp(m.utilization, Decimal::ZERO, Decimal::ONE))
}

fn arbitrage_score(m: &VenueMetrics) -> Decimal {
    m.price_deviation.abs().saturating_mul(m.trading_volume)
}
