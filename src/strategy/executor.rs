//! Rebalance execution: plans venue-to-venue transfers and records the outcome.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::ledger::ExecutionLedger;
use super::{AllocationVector, Strategy, StrategyId};
use crate::config::ExecutorConfig;
use crate::utils::decimal::saturating_sum;
use crate::venue::VenueGateway;

/// A planned move of capital between two venues of a strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferInstruction {
    pub from_index: usize,
    pub to_index: usize,
    pub from_venue: String,
    pub to_venue: String,
    pub amount: Decimal,
}

/// A completed transfer and its realized slippage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferLeg {
    pub from_venue: String,
    pub to_venue: String,
    pub amount: Decimal,
    pub slippage: Decimal,
}

/// Immutable log entry for one rebalance attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: u64,
    pub strategy_id: StrategyId,
    pub asset: String,
    pub transfers: Vec<TransferLeg>,
    pub total_cost: Decimal,
    pub predicted_gain: Decimal,
    pub net_benefit: Decimal,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub emergency: bool,
    pub error: Option<String>,
}

/// Inputs for one execution.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub current: AllocationVector,
    pub target: AllocationVector,
    /// Total managed amount across the strategy's venues
    pub total_liquidity: Decimal,
    pub predicted_gain: Decimal,
    pub emergency: bool,
}

/// Live allocation of a strategy as read from its venues.
#[derive(Debug, Clone)]
pub struct LiveAllocation {
    pub allocation: AllocationVector,
    pub total_liquidity: Decimal,
}

/// Read venue balances and derive the current allocation.
///
/// With nothing deployed the static target is reported as current, so no
/// transfers are planned.
pub async fn read_allocation(
    gateway: &dyn VenueGateway,
    strategy: &Strategy,
) -> anyhow::Result<LiveAllocation> {
    let mut balances = Vec::with_capacity(strategy.venues.len());
    for venue in &strategy.venues {
        balances.push(gateway.balance(&strategy.asset, venue).await?);
    }
    let total_liquidity = saturating_sum(balances.iter().copied());
    let allocation =
        AllocationVector::from_amounts(&balances).unwrap_or_else(|| strategy.target());
    Ok(LiveAllocation {
        allocation,
        total_liquidity,
    })
}

/// Turns allocation deltas into transfers and calls the venue gateway.
pub struct RebalanceExecutor {
    config: ExecutorConfig,
    ledger: ExecutionLedger,
}

impl RebalanceExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        let ledger = ExecutionLedger::new(config.history_retention);
        Self { config, ledger }
    }

    pub fn ledger(&self) -> &ExecutionLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut ExecutionLedger {
        &mut self.ledger
    }

    /// First-fit pairing of deficit venues with surplus venues.
    ///
    /// Both sides are visited in the strategy's venue order. A pairing below
    /// `min_transfer_size` is skipped without consuming either side.
    pub fn plan_transfers(
        &self,
        strategy: &Strategy,
        current: &AllocationVector,
        target: &AllocationVector,
        total_liquidity: Decimal,
    ) -> Vec<TransferInstruction> {
        let deltas: Vec<Decimal> = (0..strategy.venues.len())
            .map(|i| (target.get(i) - current.get(i)).saturating_mul(total_liquidity))
            .collect();

        let mut surplus: Vec<(usize, Decimal)> = deltas
            .iter()
            .enumerate()
            .filter(|(_, d)| **d < Decimal::ZERO)
            .map(|(i, d)| (i, -*d))
            .collect();
        let deficits: Vec<(usize, Decimal)> = deltas
            .iter()
            .enumerate()
            .filter(|(_, d)| **d > Decimal::ZERO)
            .map(|(i, d)| (i, *d))
            .collect();

        let mut plan = Vec::new();
        for (to_index, needed) in deficits {
            let mut remaining = needed;
            for (from_index, available) in surplus.iter_mut() {
                if remaining <= Decimal::ZERO {
                    break;
                }
                if *available <= Decimal::ZERO {
                    continue;
                }
                let amount = remaining.min(*available);
                if amount < self.config.min_transfer_size {
                    debug!(
                        strategy_id = strategy.id,
                        from = %strategy.venues[*from_index],
                        to = %strategy.venues[to_index],
                        %amount,
                        floor = %self.config.min_transfer_size,
                        "Skipping transfer below floor"
                    );
                    continue;
                }
                *available -= amount;
                remaining -= amount;
                plan.push(TransferInstruction {
                    from_index: *from_index,
                    to_index,
                    from_venue: strategy.venues[*from_index].clone(),
                    to_venue: strategy.venues[to_index].clone(),
                    amount,
                });
            }
        }
        plan
    }

    /// Execute a rebalance toward `request.target`.
    ///
    /// Transfers run one at a time and stop at the first failure. Completed
    /// transfers are kept. The strategy's `last_execution` advances whatever
    /// the outcome, and the record is appended to the ledger.
    pub async fn execute(
        &mut self,
        gateway: &dyn VenueGateway,
        strategy: &mut Strategy,
        request: ExecutionRequest,
        now: DateTime<Utc>,
    ) -> ExecutionRecord {
        let plan = self.plan_transfers(
            strategy,
            &request.current,
            &request.target,
            request.total_liquidity,
        );

        info!(
            strategy_id = strategy.id,
            asset = %strategy.asset,
            transfers = plan.len(),
            total_liquidity = %request.total_liquidity,
            emergency = request.emergency,
            "Executing rebalance"
        );

        let mut legs = Vec::with_capacity(plan.len());
        let mut attempted = 0u64;
        let mut failure = None;

        for instruction in &plan {
            attempted += 1;
            let result = gateway
                .transfer_between_venues(
                    &strategy.asset,
                    instruction.amount,
                    &instruction.from_venue,
                    &instruction.to_venue,
                )
                .await;

            match result {
                Ok(slippage) => {
                    legs.push(TransferLeg {
                        from_venue: instruction.from_venue.clone(),
                        to_venue: instruction.to_venue.clone(),
                        amount: instruction.amount,
                        slippage,
                    });
                    if slippage > strategy.max_slippage {
                        warn!(
                            strategy_id = strategy.id,
                            from = %instruction.from_venue,
                            to = %instruction.to_venue,
                            %slippage,
                            max = %strategy.max_slippage,
                            "Slippage above tolerance, halting execution"
                        );
                        failure = Some(format!(
                            "slippage {} above max {} on {} -> {}",
                            slippage,
                            strategy.max_slippage,
                            instruction.from_venue,
                            instruction.to_venue
                        ));
                        break;
                    }
                }
                Err(e) => {
                    error!(
                        strategy_id = strategy.id,
                        from = %instruction.from_venue,
                        to = %instruction.to_venue,
                        amount = %instruction.amount,
                        error = %e,
                        "Transfer failed, halting execution"
                    );
                    failure = Some(format!(
                        "transfer {} -> {} failed: {}",
                        instruction.from_venue, instruction.to_venue, e
                    ));
                    break;
                }
            }
        }

        let total_cost = Decimal::from(attempted) * self.config.transfer_cost;
        let net_benefit = request.predicted_gain - total_cost;

        strategy.last_execution = Some(now);
        if request.emergency {
            strategy.emergency = true;
        }

        let mut record = ExecutionRecord {
            id: 0,
            strategy_id: strategy.id,
            asset: strategy.asset.clone(),
            transfers: legs,
            total_cost,
            predicted_gain: request.predicted_gain,
            net_benefit,
            timestamp: now,
            success: failure.is_none(),
            emergency: request.emergency,
            error: failure,
        };
        record.id = self.ledger.append(record.clone());

        info!(
            strategy_id = record.strategy_id,
            execution_id = record.id,
            success = record.success,
            completed = record.transfers.len(),
            %total_cost,
            %net_benefit,
            "Rebalance recorded"
        );
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyLimits;
    use crate::strategy::{sample_definition, StrategyDefinition, StrategyRegistry};
    use crate::venue::{MockVenueNetwork, VenueClass, VenueMetrics};
    use rust_decimal_macros::dec;

    fn strategy_from(definition: StrategyDefinition) -> Strategy {
        let mut registry = StrategyRegistry::new(StrategyLimits::default());
        let id = registry.create(definition).unwrap();
        registry.get(id).unwrap().clone()
    }

    fn three_venue_strategy() -> Strategy {
        strategy_from(StrategyDefinition {
            venues: vec!["aave".into(), "curve".into(), "yearn".into()],
            target_allocation: vec![dec!(0.6), dec!(0.2), dec!(0.2)],
            min_allocation: vec![Decimal::ZERO; 3],
            max_allocation: vec![Decimal::ONE; 3],
            ..sample_definition()
        })
    }

    async fn network(balances: &[(&str, Decimal)]) -> MockVenueNetwork {
        let network = MockVenueNetwork::new();
        for (venue, balance) in balances {
            network
                .add_venue("USDC", VenueMetrics::new(*venue, VenueClass::Stable), *balance)
                .await;
        }
        network
    }

    fn request(current: &[Decimal], target: &[Decimal], liquidity: Decimal) -> ExecutionRequest {
        ExecutionRequest {
            current: AllocationVector::new(current.to_vec()),
            target: AllocationVector::new(target.to_vec()),
            total_liquidity: liquidity,
            predicted_gain: dec!(50),
            emergency: false,
        }
    }

    #[tokio::test]
    async fn test_two_venue_scenario_moves_from_second_to_first() {
        let network = network(&[("aave", dec!(5000)), ("curve", dec!(5000))]).await;
        let mut strategy = strategy_from(sample_definition());
        let mut executor = RebalanceExecutor::new(ExecutorConfig::default());
        let now = Utc::now();

        let record = executor
            .execute(
                &network,
                &mut strategy,
                request(&[dec!(0.5), dec!(0.5)], &[dec!(0.6), dec!(0.4)], dec!(10000)),
                now,
            )
            .await;

        assert!(record.success);
        assert_eq!(
            record.transfers,
            vec![TransferLeg {
                from_venue: "curve".into(),
                to_venue: "aave".into(),
                amount: dec!(1000),
                slippage: Decimal::ZERO,
            }]
        );
        assert_eq!(record.total_cost, dec!(2));
        assert_eq!(record.net_benefit, dec!(48));
        assert_eq!(strategy.last_execution, Some(now));
        assert_eq!(network.balance_of("USDC", "aave").await, dec!(6000));
        assert_eq!(executor.ledger().history(strategy.id).len(), 1);
    }

    #[test]
    fn test_first_fit_follows_venue_order() {
        let executor = RebalanceExecutor::new(ExecutorConfig::default());
        let strategy = three_venue_strategy();

        let plan = executor.plan_transfers(
            &strategy,
            &AllocationVector::new(vec![dec!(0.2), dec!(0.4), dec!(0.4)]),
            &AllocationVector::new(vec![dec!(0.6), dec!(0.2), dec!(0.2)]),
            dec!(1000),
        );

        let moves: Vec<(&str, &str, Decimal)> = plan
            .iter()
            .map(|t| (t.from_venue.as_str(), t.to_venue.as_str(), t.amount))
            .collect();
        assert_eq!(
            moves,
            vec![("curve", "aave", dec!(200)), ("yearn", "aave", dec!(200))]
        );
    }

    #[test]
    fn test_never_plans_below_floor() {
        let executor = RebalanceExecutor::new(ExecutorConfig::default());
        let strategy = three_venue_strategy();

        // 50 from curve is under the 100 floor and is skipped; yearn covers the rest
        let plan = executor.plan_transfers(
            &strategy,
            &AllocationVector::new(vec![dec!(0.4), dec!(0.45), dec!(0.15)]),
            &AllocationVector::new(vec![dec!(0.6), dec!(0.4), Decimal::ZERO]),
            dec!(1000),
        );

        assert!(plan.iter().all(|t| t.amount >= dec!(100)));
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].from_venue, "yearn");
        assert_eq!(plan[0].amount, dec!(150));
    }

    #[tokio::test]
    async fn test_failure_halts_and_still_advances_cooldown() {
        let network = network(&[
            ("aave", dec!(200)),
            ("curve", dec!(400)),
            ("yearn", dec!(400)),
        ])
        .await;
        network.fail_after(1).await;
        let mut strategy = three_venue_strategy();
        let mut executor = RebalanceExecutor::new(ExecutorConfig::default());
        let now = Utc::now();

        let record = executor
            .execute(
                &network,
                &mut strategy,
                request(
                    &[dec!(0.2), dec!(0.4), dec!(0.4)],
                    &[dec!(0.6), dec!(0.2), dec!(0.2)],
                    dec!(1000),
                ),
                now,
            )
            .await;

        assert!(!record.success);
        assert_eq!(record.transfers.len(), 1);
        assert!(record.error.is_some());
        assert_eq!(record.total_cost, dec!(4));
        assert_eq!(strategy.last_execution, Some(now));
        assert_eq!(network.transfers().await.len(), 1);
        // Completed leg is not reversed
        assert_eq!(network.balance_of("USDC", "aave").await, dec!(400));
    }

    #[tokio::test]
    async fn test_excess_slippage_counts_as_failure() {
        let network = network(&[("aave", dec!(5000)), ("curve", dec!(5000))]).await;
        network.set_slippage(dec!(0.02)).await;
        let mut strategy = strategy_from(sample_definition());
        let mut executor = RebalanceExecutor::new(ExecutorConfig::default());

        let record = executor
            .execute(
                &network,
                &mut strategy,
                request(&[dec!(0.5), dec!(0.5)], &[dec!(0.6), dec!(0.4)], dec!(10000)),
                Utc::now(),
            )
            .await;

        assert!(!record.success);
        assert_eq!(record.transfers[0].slippage, dec!(0.02));
    }

    #[tokio::test]
    async fn test_emergency_execution_flags_strategy() {
        let network = network(&[("aave", dec!(5000)), ("curve", dec!(5000))]).await;
        let mut strategy = strategy_from(sample_definition());
        let mut executor = RebalanceExecutor::new(ExecutorConfig::default());
        let mut req = request(&[dec!(0.5), dec!(0.5)], &[dec!(0.8), dec!(0.2)], dec!(10000));
        req.emergency = true;

        let record = executor.execute(&network, &mut strategy, req, Utc::now()).await;

        assert!(record.emergency);
        assert!(strategy.emergency);
    }

    #[tokio::test]
    async fn test_read_allocation_from_balances() {
        let network = network(&[("aave", dec!(2500)), ("curve", dec!(7500))]).await;
        let strategy = strategy_from(sample_definition());

        let live = read_allocation(&network, &strategy).await.unwrap();

        assert_eq!(live.total_liquidity, dec!(10000));
        assert_eq!(live.allocation.as_slice(), &[dec!(0.25), dec!(0.75)]);
    }
}
