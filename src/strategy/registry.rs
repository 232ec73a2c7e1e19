//! Strategy definitions and their lifecycle.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{info, warn};

use super::AllocationVector;
use crate::config::StrategyLimits;
use crate::error::{RebalancerError, RebalancerResult, ValidationError};

pub type StrategyId = u64;

/// Longest cooldown honored (100 years); larger values are clamped.
const MAX_COOLDOWN_SECS: i64 = 100 * 365 * 24 * 3600;

/// Scoring algorithm a strategy uses to pick its target allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AllocationAlgorithm {
    YieldOptimization,
    RiskMinimization,
    LiquidityMaximization,
    ArbitrageCapture,
    DynamicHedging,
}

impl fmt::Display for AllocationAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AllocationAlgorithm::YieldOptimization => "yield_optimization",
            AllocationAlgorithm::RiskMinimization => "risk_minimization",
            AllocationAlgorithm::LiquidityMaximization => "liquidity_maximization",
            AllocationAlgorithm::ArbitrageCapture => "arbitrage_capture",
            AllocationAlgorithm::DynamicHedging => "dynamic_hedging",
        };
        f.write_str(name)
    }
}

/// Operator-supplied strategy parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyDefinition {
    /// Asset the strategy manages (e.g., "USDC")
    pub asset: String,
    pub algorithm: AllocationAlgorithm,
    /// Venues in allocation order
    pub venues: Vec<String>,
    /// Target fractions, must sum to exactly 1
    pub target_allocation: Vec<Decimal>,
    pub min_allocation: Vec<Decimal>,
    pub max_allocation: Vec<Decimal>,
    /// Total absolute deviation that warrants a rebalance
    pub deviation_threshold: Decimal,
    /// Maximum acceptable realized slippage per transfer (0.0-1.0)
    pub max_slippage: Decimal,
    /// Minimum seconds between two rebalances
    pub cooldown_secs: u64,
}

impl StrategyDefinition {
    /// Check the definition against the registry limits.
    pub fn validate(&self, limits: &StrategyLimits) -> Result<(), ValidationError> {
        let n = self.venues.len();
        if self.target_allocation.len() != n
            || self.min_allocation.len() != n
            || self.max_allocation.len() != n
        {
            return Err(ValidationError::LengthMismatch {
                venues: n,
                target: self.target_allocation.len(),
                min: self.min_allocation.len(),
                max: self.max_allocation.len(),
            });
        }

        if n > limits.max_venues {
            return Err(ValidationError::TooManyVenues {
                count: n,
                max: limits.max_venues,
            });
        }

        if self.max_slippage > limits.max_slippage_ceiling {
            return Err(ValidationError::SlippageAboveCeiling {
                requested: self.max_slippage,
                ceiling: limits.max_slippage_ceiling,
            });
        }

        let sum: Decimal = self.target_allocation.iter().copied().sum();
        if sum != Decimal::ONE {
            return Err(ValidationError::TargetSumNotOne(sum));
        }

        for (index, target) in self.target_allocation.iter().enumerate() {
            let (min, max) = (self.min_allocation[index], self.max_allocation[index]);
            if *target < min || *target > max {
                return Err(ValidationError::TargetOutOfBounds {
                    index,
                    target: *target,
                    min,
                    max,
                });
            }
        }

        Ok(())
    }
}

/// A registered strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: StrategyId,
    pub asset: String,
    pub algorithm: AllocationAlgorithm,
    pub venues: Vec<String>,
    pub target_allocation: Vec<Decimal>,
    pub min_allocation: Vec<Decimal>,
    pub max_allocation: Vec<Decimal>,
    pub deviation_threshold: Decimal,
    pub max_slippage: Decimal,
    pub cooldown_secs: u64,
    pub last_execution: Option<DateTime<Utc>>,
    pub active: bool,
    pub emergency: bool,
}

impl Strategy {
    fn from_definition(id: StrategyId, definition: StrategyDefinition) -> Self {
        Self {
            id,
            asset: definition.asset,
            algorithm: definition.algorithm,
            venues: definition.venues,
            target_allocation: definition.target_allocation,
            min_allocation: definition.min_allocation,
            max_allocation: definition.max_allocation,
            deviation_threshold: definition.deviation_threshold,
            max_slippage: definition.max_slippage,
            cooldown_secs: definition.cooldown_secs,
            last_execution: None,
            active: true,
            emergency: false,
        }
    }

    /// The editable parameters of this strategy.
    pub fn definition(&self) -> StrategyDefinition {
        StrategyDefinition {
            asset: self.asset.clone(),
            algorithm: self.algorithm,
            venues: self.venues.clone(),
            target_allocation: self.target_allocation.clone(),
            min_allocation: self.min_allocation.clone(),
            max_allocation: self.max_allocation.clone(),
            deviation_threshold: self.deviation_threshold,
            max_slippage: self.max_slippage,
            cooldown_secs: self.cooldown_secs,
        }
    }

    /// Static target as an allocation vector.
    pub fn target(&self) -> AllocationVector {
        AllocationVector::new(self.target_allocation.clone())
    }

    pub fn cooldown(&self) -> Duration {
        let secs = i64::try_from(self.cooldown_secs).unwrap_or(MAX_COOLDOWN_SECS);
        Duration::seconds(secs.min(MAX_COOLDOWN_SECS))
    }

    /// Earliest time the next non-emergency rebalance may run.
    pub fn next_eligible_at(&self) -> Option<DateTime<Utc>> {
        self.last_execution.map(|last| last + self.cooldown())
    }

    /// True once `now >= last_execution + cooldown` (always true if never executed).
    pub fn cooldown_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.next_eligible_at().map_or(true, |eligible| now >= eligible)
    }

    /// Index of a venue in the allocation order.
    pub fn venue_index(&self, venue: &str) -> Option<usize> {
        self.venues.iter().position(|v| v == venue)
    }
}

/// Durable store of strategies, keyed by id. Strategies are never deleted.
pub struct StrategyRegistry {
    limits: StrategyLimits,
    strategies: BTreeMap<StrategyId, Strategy>,
    next_id: StrategyId,
}

impl StrategyRegistry {
    pub fn new(limits: StrategyLimits) -> Self {
        Self {
            limits,
            strategies: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Validate and register a new, active strategy.
    pub fn create(&mut self, definition: StrategyDefinition) -> Result<StrategyId, ValidationError> {
        if let Err(e) = definition.validate(&self.limits) {
            warn!(asset = %definition.asset, error = %e, "Rejected strategy definition");
            return Err(e);
        }

        let id = self.next_id;
        self.next_id += 1;

        info!(
            strategy_id = id,
            asset = %definition.asset,
            algorithm = %definition.algorithm,
            venues = definition.venues.len(),
            "Strategy created"
        );

        self.strategies
            .insert(id, Strategy::from_definition(id, definition));
        Ok(id)
    }

    /// Replace a strategy's parameters, keeping its id, state and timestamps.
    pub fn update(&mut self, id: StrategyId, definition: StrategyDefinition) -> RebalancerResult<()> {
        definition.validate(&self.limits)?;
        let strategy = self
            .strategies
            .get_mut(&id)
            .ok_or(RebalancerError::StrategyNotFound(id))?;

        let mut updated = Strategy::from_definition(id, definition);
        updated.last_execution = strategy.last_execution;
        updated.active = strategy.active;
        updated.emergency = strategy.emergency;
        *strategy = updated;

        info!(strategy_id = id, "Strategy updated");
        Ok(())
    }

    pub fn deactivate(&mut self, id: StrategyId) -> RebalancerResult<()> {
        self.set_active(id, false)
    }

    pub fn reactivate(&mut self, id: StrategyId) -> RebalancerResult<()> {
        self.set_active(id, true)
    }

    fn set_active(&mut self, id: StrategyId, active: bool) -> RebalancerResult<()> {
        let strategy = self
            .strategies
            .get_mut(&id)
            .ok_or(RebalancerError::StrategyNotFound(id))?;
        strategy.active = active;
        info!(strategy_id = id, active, "Strategy activation changed");
        Ok(())
    }

    /// Clear a strategy's emergency flag.
    pub fn clear_emergency(&mut self, id: StrategyId) -> RebalancerResult<()> {
        let strategy = self
            .strategies
            .get_mut(&id)
            .ok_or(RebalancerError::StrategyNotFound(id))?;
        strategy.emergency = false;
        info!(strategy_id = id, "Strategy emergency flag cleared");
        Ok(())
    }

    pub fn get(&self, id: StrategyId) -> Option<&Strategy> {
        self.strategies.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: StrategyId) -> Option<&mut Strategy> {
        self.strategies.get_mut(&id)
    }

    /// All strategies in id order.
    pub fn list(&self) -> impl Iterator<Item = &Strategy> {
        self.strategies.values()
    }

    /// Active strategies in id order.
    pub fn active(&self) -> impl Iterator<Item = &Strategy> {
        self.strategies.values().filter(|s| s.active)
    }

    pub fn active_ids(&self) -> Vec<StrategyId> {
        self.active().map(|s| s.id).collect()
    }

    /// Assets managed by at least one active strategy.
    pub fn active_assets(&self) -> BTreeSet<String> {
        self.active().map(|s| s.asset.clone()).collect()
    }

    /// Venues targeted by active strategies for `asset`.
    pub fn venues_for(&self, asset: &str) -> BTreeSet<String> {
        self.active()
            .filter(|s| s.asset == asset)
            .flat_map(|s| s.venues.iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Re-insert a previously persisted strategy.
    pub fn restore(&mut self, strategy: Strategy) {
        self.next_id = self.next_id.max(strategy.id + 1);
        self.strategies.insert(strategy.id, strategy);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    pub(crate) fn two_venue_definition() -> StrategyDefinition {
        StrategyDefinition {
            asset: "USDC".to_string(),
            algorithm: AllocationAlgorithm::YieldOptimization,
            venues: vec!["aave".to_string(), "curve".to_string()],
            target_allocation: vec![dec!(0.6), dec!(0.4)],
            min_allocation: vec![dec!(0.1), dec!(0.1)],
            max_allocation: vec![dec!(0.9), dec!(0.9)],
            deviation_threshold: dec!(0.05),
            max_slippage: dec!(0.01),
            cooldown_secs: 3600,
        }
    }

    fn registry() -> StrategyRegistry {
        StrategyRegistry::new(StrategyLimits::default())
    }

    #[test]
    fn test_create_valid_strategy() {
        let mut registry = registry();
        let id = registry.create(two_venue_definition()).unwrap();

        let strategy = registry.get(id).unwrap();
        assert!(strategy.active);
        assert!(!strategy.emergency);
        assert_eq!(strategy.last_execution, None);
        assert_eq!(registry.create(two_venue_definition()).unwrap(), id + 1);
    }

    #[test]
    fn test_create_rejects_length_mismatch() {
        let mut def = two_venue_definition();
        def.min_allocation.pop();
        assert!(matches!(
            registry().create(def),
            Err(ValidationError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_create_rejects_too_many_venues() {
        let mut registry = StrategyRegistry::new(StrategyLimits {
            max_venues: 1,
            ..StrategyLimits::default()
        });
        assert!(matches!(
            registry.create(two_venue_definition()),
            Err(ValidationError::TooManyVenues { count: 2, max: 1 })
        ));
    }

    #[test]
    fn test_create_rejects_slippage_above_ceiling() {
        let mut def = two_venue_definition();
        def.max_slippage = dec!(0.06);
        assert!(matches!(
            registry().create(def),
            Err(ValidationError::SlippageAboveCeiling { .. })
        ));
    }

    #[test]
    fn test_create_requires_exact_sum() {
        let mut def = two_venue_definition();
        def.target_allocation = vec![dec!(0.6), dec!(0.3999999999)];
        assert!(matches!(
            registry().create(def),
            Err(ValidationError::TargetSumNotOne(_))
        ));
    }

    #[test]
    fn test_create_rejects_target_outside_bounds() {
        let mut def = two_venue_definition();
        def.max_allocation = vec![dec!(0.5), dec!(0.9)];
        assert!(matches!(
            registry().create(def),
            Err(ValidationError::TargetOutOfBounds { index: 0, .. })
        ));
    }

    #[test]
    fn test_rejected_create_leaves_registry_unchanged() {
        let mut registry = registry();
        let mut def = two_venue_definition();
        def.target_allocation = vec![dec!(0.5), dec!(0.4)];
        assert!(registry.create(def).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_deactivate_and_reactivate() {
        let mut registry = registry();
        let id = registry.create(two_venue_definition()).unwrap();

        registry.deactivate(id).unwrap();
        assert_eq!(registry.active().count(), 0);
        assert!(registry.active_assets().is_empty());

        registry.reactivate(id).unwrap();
        assert_eq!(registry.active_ids(), vec![id]);
        assert!(matches!(
            registry.deactivate(99),
            Err(RebalancerError::StrategyNotFound(99))
        ));
    }

    #[test]
    fn test_update_keeps_runtime_state() {
        let mut registry = registry();
        let id = registry.create(two_venue_definition()).unwrap();
        let executed_at = Utc::now();
        registry.get_mut(id).unwrap().last_execution = Some(executed_at);

        let mut def = two_venue_definition();
        def.deviation_threshold = dec!(0.1);
        registry.update(id, def).unwrap();

        let strategy = registry.get(id).unwrap();
        assert_eq!(strategy.deviation_threshold, dec!(0.1));
        assert_eq!(strategy.last_execution, Some(executed_at));
    }

    #[test]
    fn test_cooldown_elapsed() {
        let mut registry = registry();
        let id = registry.create(two_venue_definition()).unwrap();
        let now = Utc::now();
        assert!(registry.get(id).unwrap().cooldown_elapsed(now));

        registry.get_mut(id).unwrap().last_execution = Some(now);
        let strategy = registry.get(id).unwrap();
        assert!(!strategy.cooldown_elapsed(now + Duration::seconds(3599)));
        assert!(strategy.cooldown_elapsed(now + Duration::seconds(3600)));
    }
}
