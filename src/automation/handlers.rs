//! Task handlers, one per task kind.

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::alert::RiskAlert;
use super::scheduler::{SchedulerContext, TaskScheduler};
use super::task::{AutomationTask, TaskKind};
use crate::market::MarketSnapshot;
use crate::strategy::{
    read_allocation, ExecutionRecord, ExecutionRequest, RoutedTarget, StrategyId,
};

/// What a successful handler run cost and did.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerOutcome {
    pub cost: Decimal,
    pub detail: String,
}

impl HandlerOutcome {
    fn free(detail: impl Into<String>) -> Self {
        Self {
            cost: Decimal::ZERO,
            detail: detail.into(),
        }
    }
}

/// How a rebalance pass picks its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RebalanceMode {
    /// Optimizer target through the gate, with per-strategy emergency routing
    Normal,
    /// Only strategies whose own risk is at emergency level
    EmergencyOnly,
    /// Safe allocation for every strategy, gate bypassed
    ForceSafe,
}

impl TaskScheduler {
    pub(super) async fn run_handler(
        &self,
        ctx: &mut SchedulerContext,
        task: &AutomationTask,
        now: DateTime<Utc>,
    ) -> anyhow::Result<HandlerOutcome> {
        match task.kind {
            TaskKind::Rebalance => self.rebalance_all(ctx, task, now, RebalanceMode::Normal).await,
            TaskKind::EmergencyResponse => {
                let mode = if ctx.in_emergency() {
                    RebalanceMode::ForceSafe
                } else {
                    RebalanceMode::EmergencyOnly
                };
                self.rebalance_all(ctx, task, now, mode).await
            }
            TaskKind::Compound => {
                self.collaborators
                    .yield_ops
                    .compound_yield()
                    .await
                    .context("compound yield")?;
                Ok(HandlerOutcome::free("yield compounded"))
            }
            TaskKind::RevenueDistribution => {
                let assets: Vec<String> = match task.asset_filter() {
                    Some(assets) => assets,
                    None => ctx.registry.active_assets().into_iter().collect(),
                };
                for asset in &assets {
                    self.collaborators
                        .yield_ops
                        .distribute_revenue(asset)
                        .await
                        .with_context(|| format!("distribute revenue for {}", asset))?;
                }
                Ok(HandlerOutcome::free(format!(
                    "revenue distributed for {} assets",
                    assets.len()
                )))
            }
            TaskKind::RiskAssessment => Ok(self.assess_risk(ctx, task)),
        }
    }

    fn assess_risk(&self, ctx: &SchedulerContext, task: &AutomationTask) -> HandlerOutcome {
        let limit = if task.threshold > Decimal::ZERO {
            task.threshold
        } else {
            self.risk_alert_level
        };
        let mut flagged = 0usize;
        for snapshot in ctx.monitor.snapshots() {
            if snapshot.risk_score >= limit {
                flagged += 1;
                RiskAlert::elevated_risk(&snapshot.asset, snapshot.risk_score, limit)
                    .with_metric("volatility", snapshot.volatility)
                    .with_metric("liquidity_depth", snapshot.liquidity_depth)
                    .emit();
            }
        }
        HandlerOutcome::free(format!("{} assets at or above risk {}", flagged, limit))
    }

    async fn rebalance_all(
        &self,
        ctx: &mut SchedulerContext,
        task: &AutomationTask,
        now: DateTime<Utc>,
        mode: RebalanceMode,
    ) -> anyhow::Result<HandlerOutcome> {
        let filter = task.strategy_filter();
        let ids: Vec<StrategyId> = ctx
            .registry
            .active_ids()
            .into_iter()
            .filter(|id| filter.as_ref().map_or(true, |f| f.contains(id)))
            .collect();

        let mut cost = Decimal::ZERO;
        let mut executed = 0usize;
        let mut failed = 0usize;
        let mut errors = Vec::new();

        for id in ids {
            if task.resource_budget > Decimal::ZERO && cost >= task.resource_budget {
                warn!(task_id = task.id, %cost, budget = %task.resource_budget, "Resource budget exhausted");
                break;
            }
            match self.rebalance_strategy(ctx, id, now, mode).await {
                Ok(Some(record)) => {
                    cost += record.total_cost;
                    executed += 1;
                    if !record.success {
                        failed += 1;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(strategy_id = id, error = %e, "Rebalance skipped");
                    errors.push(format!("strategy {}: {:#}", id, e));
                }
            }
        }

        if !errors.is_empty() {
            return Err(anyhow!(errors.join("; ")));
        }
        Ok(HandlerOutcome {
            cost,
            detail: format!("{} rebalances executed, {} failed", executed, failed),
        })
    }

    /// Gate and execute one strategy. `None` when nothing was executed.
    async fn rebalance_strategy(
        &self,
        ctx: &mut SchedulerContext,
        id: StrategyId,
        now: DateTime<Utc>,
        mode: RebalanceMode,
    ) -> anyhow::Result<Option<ExecutionRecord>> {
        let Some(strategy) = ctx.registry.get(id).filter(|s| s.active).cloned() else {
            return Ok(None);
        };
        let snapshot = ctx
            .monitor
            .snapshot(&strategy.asset)
            .cloned()
            .unwrap_or_else(|| MarketSnapshot::neutral(&strategy.asset, now));
        let metrics = ctx
            .venue_metrics
            .get(&strategy.asset)
            .cloned()
            .unwrap_or_default();

        let live = read_allocation(self.collaborators.venues.as_ref(), &strategy)
            .await
            .context("read venue balances")?;

        let routed = match mode {
            RebalanceMode::ForceSafe => RoutedTarget {
                target: self.gate.safe_allocation(&strategy, &metrics),
                emergency: true,
            },
            RebalanceMode::Normal | RebalanceMode::EmergencyOnly => {
                let optimized = self.optimizer.compute_target(&strategy, &snapshot, &metrics);
                self.gate
                    .route(&strategy, optimized, snapshot.risk_score, &metrics)
            }
        };

        if routed.emergency {
            let plan = ctx.executor.plan_transfers(
                &strategy,
                &live.allocation,
                &routed.target,
                live.total_liquidity,
            );
            if plan.is_empty() {
                debug!(strategy_id = id, "Already at safe allocation");
                return Ok(None);
            }
        } else {
            if mode == RebalanceMode::EmergencyOnly {
                return Ok(None);
            }
            if strategy.emergency {
                debug!(strategy_id = id, "Strategy held in emergency allocation");
                return Ok(None);
            }
            let decision = self
                .gate
                .evaluate(&strategy, &live.allocation, &routed.target, now);
            if !decision.should_execute() {
                debug!(strategy_id = id, ?decision, "Rebalance gated");
                return Ok(None);
            }
        }

        let predicted_gain = self.optimizer.predicted_gain(
            &strategy,
            &live.allocation,
            &routed.target,
            &metrics,
            live.total_liquidity,
        );
        let request = ExecutionRequest {
            current: live.allocation,
            target: routed.target,
            total_liquidity: live.total_liquidity,
            predicted_gain,
            emergency: routed.emergency,
        };

        let Some(strategy) = ctx.registry.get_mut(id) else {
            return Ok(None);
        };
        let record = ctx
            .executor
            .execute(self.collaborators.venues.as_ref(), strategy, request, now)
            .await;
        if record.emergency {
            info!(strategy_id = id, execution_id = record.id, "Emergency allocation applied");
        }
        Ok(Some(record))
    }
}
