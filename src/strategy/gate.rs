//! Rebalance gating: cooldown, deviation threshold and emergency routing.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::optimizer::align_metrics;
use super::{AllocationVector, Strategy};
use crate::config::GateConfig;
use crate::venue::{VenueClass, VenueMetrics};

/// Outcome of gating one strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// Deviation meets the threshold and the cooldown has elapsed
    Proceed { deviation: Decimal },
    /// Strategy is deactivated
    Inactive,
    /// Cooldown still running; nothing else is considered
    CooldownActive { eligible_at: DateTime<Utc> },
    /// Allocation is close enough to target
    BelowThreshold { deviation: Decimal, threshold: Decimal },
}

impl GateDecision {
    pub fn should_execute(&self) -> bool {
        matches!(self, GateDecision::Proceed { .. })
    }
}

/// Target chosen after emergency routing.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedTarget {
    pub target: AllocationVector,
    /// True when the safe allocation replaced the optimizer's output
    pub emergency: bool,
}

/// Decides whether a rebalance is warranted and where emergencies go.
pub struct RebalanceGate {
    config: GateConfig,
}

impl RebalanceGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    /// Full gating decision for a strategy.
    pub fn evaluate(
        &self,
        strategy: &Strategy,
        current: &AllocationVector,
        target: &AllocationVector,
        now: DateTime<Utc>,
    ) -> GateDecision {
        if !strategy.active {
            return GateDecision::Inactive;
        }

        if let Some(eligible_at) = strategy.next_eligible_at() {
            if now < eligible_at {
                debug!(strategy_id = strategy.id, %eligible_at, "Rebalance cooldown active");
                return GateDecision::CooldownActive { eligible_at };
            }
        }

        let deviation = current.deviation(target);
        if deviation >= strategy.deviation_threshold {
            GateDecision::Proceed { deviation }
        } else {
            debug!(
                strategy_id = strategy.id,
                %deviation,
                threshold = %strategy.deviation_threshold,
                "Deviation below threshold"
            );
            GateDecision::BelowThreshold {
                deviation,
                threshold: strategy.deviation_threshold,
            }
        }
    }

    /// True iff the cooldown has elapsed and total deviation meets the threshold.
    pub fn should_rebalance(
        &self,
        strategy: &Strategy,
        current: &AllocationVector,
        target: &AllocationVector,
        now: DateTime<Utc>,
    ) -> bool {
        self.evaluate(strategy, current, target, now).should_execute()
    }

    /// True when `risk_score` reaches the emergency threshold.
    pub fn is_emergency(&self, strategy: &Strategy, risk_score: Decimal) -> bool {
        let emergency = risk_score >= self.config.emergency_threshold;
        if emergency {
            warn!(
                strategy_id = strategy.id,
                asset = %strategy.asset,
                %risk_score,
                threshold = %self.config.emergency_threshold,
                "Emergency risk level reached"
            );
        }
        emergency
    }

    /// Defensive allocation weighted toward stable venues.
    ///
    /// Stable venues share `safe_stable_weight` equally and the remainder is
    /// split over the other venues. Without a stable venue everything goes to
    /// the lowest-risk venue. Strategy bounds do not apply.
    pub fn safe_allocation(&self, strategy: &Strategy, metrics: &[VenueMetrics]) -> AllocationVector {
        let aligned = align_metrics(strategy, metrics);
        if aligned.iter().all(Option::is_none) {
            return strategy.target();
        }

        let n = aligned.len();
        let stable: Vec<bool> = aligned
            .iter()
            .map(|m| matches!(m, Some(m) if m.class == VenueClass::Stable))
            .collect();
        let stable_count = stable.iter().filter(|s| **s).count();

        let weights: Vec<Decimal> = if stable_count == 0 {
            let safest = aligned
                .iter()
                .enumerate()
                .filter_map(|(i, m)| m.map(|m| (i, m.risk_score)))
                .min_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)))
                .map(|(i, _)| i)
                .unwrap_or(0);
            (0..n)
                .map(|i| if i == safest { Decimal::ONE } else { Decimal::ZERO })
                .collect()
        } else if stable_count == n {
            vec![Decimal::ONE; n]
        } else {
            let stable_share = self.config.safe_stable_weight / Decimal::from(stable_count as u64);
            let other_share = (Decimal::ONE - self.config.safe_stable_weight)
                / Decimal::from((n - stable_count) as u64);
            stable
                .iter()
                .map(|s| if *s { stable_share } else { other_share })
                .collect()
        };

        AllocationVector::new(weights).renormalized(&strategy.target())
    }

    /// Pick the safe allocation over `optimized` when the risk score is an emergency.
    pub fn route(
        &self,
        strategy: &Strategy,
        optimized: AllocationVector,
        risk_score: Decimal,
        metrics: &[VenueMetrics],
    ) -> RoutedTarget {
        if self.is_emergency(strategy, risk_score) {
            RoutedTarget {
                target: self.safe_allocation(strategy, metrics),
                emergency: true,
            }
        } else {
            RoutedTarget {
                target: optimized,
                emergency: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyLimits;
    use crate::strategy::{sample_definition, AllocationAlgorithm, StrategyRegistry};
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn strategy() -> Strategy {
        let mut registry = StrategyRegistry::new(StrategyLimits::default());
        let id = registry.create(sample_definition()).unwrap();
        registry.get(id).unwrap().clone()
    }

    fn gate() -> RebalanceGate {
        RebalanceGate::new(GateConfig::default())
    }

    fn alloc(values: &[Decimal]) -> AllocationVector {
        AllocationVector::new(values.to_vec())
    }

    #[test]
    fn test_rebalance_when_deviation_meets_threshold() {
        let s = strategy();
        let decision = gate().evaluate(
            &s,
            &alloc(&[dec!(0.5), dec!(0.5)]),
            &alloc(&[dec!(0.6), dec!(0.4)]),
            Utc::now(),
        );
        assert_eq!(decision, GateDecision::Proceed { deviation: dec!(0.2) });
    }

    #[test]
    fn test_no_rebalance_below_threshold() {
        let s = strategy();
        assert!(!gate().should_rebalance(
            &s,
            &alloc(&[dec!(0.59), dec!(0.41)]),
            &alloc(&[dec!(0.6), dec!(0.4)]),
            Utc::now(),
        ));
    }

    #[test]
    fn test_deviation_equal_to_threshold_triggers() {
        let s = strategy();
        assert!(gate().should_rebalance(
            &s,
            &alloc(&[dec!(0.575), dec!(0.425)]),
            &alloc(&[dec!(0.6), dec!(0.4)]),
            Utc::now(),
        ));
    }

    #[test]
    fn test_cooldown_is_absolute() {
        let mut s = strategy();
        let now = Utc::now();
        s.last_execution = Some(now - Duration::seconds(10));

        // Full swing deviation, still blocked
        let decision = gate().evaluate(
            &s,
            &alloc(&[Decimal::ONE, Decimal::ZERO]),
            &alloc(&[Decimal::ZERO, Decimal::ONE]),
            now,
        );
        assert!(matches!(decision, GateDecision::CooldownActive { .. }));

        assert!(gate().should_rebalance(
            &s,
            &alloc(&[Decimal::ONE, Decimal::ZERO]),
            &alloc(&[Decimal::ZERO, Decimal::ONE]),
            now + Duration::seconds(3590),
        ));
    }

    #[test]
    fn test_inactive_strategy_never_rebalances() {
        let mut s = strategy();
        s.active = false;
        assert_eq!(
            gate().evaluate(
                &s,
                &alloc(&[Decimal::ONE, Decimal::ZERO]),
                &alloc(&[Decimal::ZERO, Decimal::ONE]),
                Utc::now()
            ),
            GateDecision::Inactive
        );
    }

    #[test]
    fn test_emergency_threshold() {
        let s = strategy();
        assert!(gate().is_emergency(&s, dec!(85)));
        assert!(gate().is_emergency(&s, dec!(80)));
        assert!(!gate().is_emergency(&s, dec!(79.99)));
    }

    #[test]
    fn test_emergency_routes_to_safe_allocation_for_any_algorithm() {
        let metrics = vec![
            VenueMetrics::new("aave", VenueClass::Stable),
            VenueMetrics::new("curve", VenueClass::Growth),
        ];
        for algorithm in [
            AllocationAlgorithm::YieldOptimization,
            AllocationAlgorithm::DynamicHedging,
        ] {
            let mut s = strategy();
            s.algorithm = algorithm;
            let optimized = alloc(&[dec!(0.1), dec!(0.9)]);

            let routed = gate().route(&s, optimized, dec!(85), &metrics);

            assert!(routed.emergency);
            assert_eq!(routed.target.as_slice(), &[dec!(0.8), dec!(0.2)]);
        }
    }

    #[test]
    fn test_normal_risk_keeps_optimizer_target() {
        let s = strategy();
        let optimized = alloc(&[dec!(0.1), dec!(0.9)]);
        let routed = gate().route(&s, optimized.clone(), dec!(40), &[]);
        assert!(!routed.emergency);
        assert_eq!(routed.target, optimized);
    }

    #[test]
    fn test_safe_allocation_without_stable_venue() {
        let s = strategy();
        let metrics = vec![
            VenueMetrics::new("aave", VenueClass::Growth).with_risk(dec!(60)),
            VenueMetrics::new("curve", VenueClass::HighRisk).with_risk(dec!(30)),
        ];
        let safe = gate().safe_allocation(&s, &metrics);
        assert_eq!(safe.as_slice(), &[Decimal::ZERO, Decimal::ONE]);
    }

    #[test]
    fn test_safe_allocation_all_stable_is_equal_split() {
        let s = strategy();
        let metrics = vec![
            VenueMetrics::new("aave", VenueClass::Stable),
            VenueMetrics::new("curve", VenueClass::Stable),
        ];
        let safe = gate().safe_allocation(&s, &metrics);
        assert_eq!(safe.as_slice(), &[dec!(0.5), dec!(0.5)]);
    }
}
