//! The automation loop.
//!
//! Each tick refreshes market conditions for every asset with an active
//! strategy, evaluates the global emergency predicate, marks tasks whose
//! trigger holds as due and runs up to `max_tasks_per_tick` of them in
//! ascending id order. Emergency tasks go first while emergency mode is on.
//!
//! All mutable scheduler state lives in [`SchedulerContext`] behind a
//! `tokio::sync::Mutex` that operator reads and writes wait on. Ticks and
//! forced executions are admitted through a separate guard taken with
//! `try_lock`, so a second one arriving while another runs is rejected
//! instead of queued.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use futures_util::FutureExt;
use rust_decimal::Decimal;
use serde::Serialize;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use super::alert::RiskAlert;
use super::metrics::PerformanceMetrics;
use super::task::{
    AutomationTask, ScheduledExecution, TaskDefinition, TaskExecution, TaskId, TaskKind,
    TaskState, TriggerKind,
};
use crate::config::{Config, SchedulerConfig};
use crate::error::{RebalancerError, RebalancerResult, ValidationError};
use crate::market::{EmergencyTrigger, MarketConditionMonitor};
use crate::strategy::{
    read_allocation, AllocationOptimizer, RebalanceExecutor, RebalanceGate, StrategyRegistry,
};
use crate::venue::{
    MarketObservation, MockVenueNetwork, PriceOracle, RiskOracle, VenueGateway, VenueMetrics,
    YieldOperations,
};

/// External services the scheduler drives.
#[derive(Clone)]
pub struct Collaborators {
    pub prices: Arc<dyn PriceOracle>,
    pub risk: Arc<dyn RiskOracle>,
    pub venues: Arc<dyn VenueGateway>,
    pub yield_ops: Arc<dyn YieldOperations>,
}

impl Collaborators {
    /// All four roles served by one simulated network.
    pub fn simulated(network: &MockVenueNetwork) -> Self {
        Self {
            prices: Arc::new(network.clone()),
            risk: Arc::new(network.clone()),
            venues: Arc::new(network.clone()),
            yield_ops: Arc::new(network.clone()),
        }
    }

    pub fn with_yield_ops(mut self, yield_ops: Arc<dyn YieldOperations>) -> Self {
        self.yield_ops = yield_ops;
        self
    }
}

/// Everything the scheduler mutates, owned in one place.
pub struct SchedulerContext {
    pub(crate) registry: StrategyRegistry,
    pub(crate) monitor: MarketConditionMonitor,
    pub(crate) executor: RebalanceExecutor,
    pub(crate) tasks: BTreeMap<TaskId, AutomationTask>,
    /// Latest venue metrics per asset, from the last refresh
    pub(crate) venue_metrics: BTreeMap<String, Vec<VenueMetrics>>,
    pub(crate) pending_events: BTreeSet<TaskId>,
    pub(crate) emergency: Option<EmergencyTrigger>,
    pub(crate) automation_enabled: bool,
    pub(crate) metrics: PerformanceMetrics,
    history: VecDeque<TaskExecution>,
    history_retention: usize,
    next_task_id: TaskId,
}

impl SchedulerContext {
    pub fn new(config: &Config) -> Self {
        Self {
            registry: StrategyRegistry::new(config.strategy.clone()),
            monitor: MarketConditionMonitor::new(config.monitor.clone()),
            executor: RebalanceExecutor::new(config.executor.clone()),
            tasks: BTreeMap::new(),
            venue_metrics: BTreeMap::new(),
            pending_events: BTreeSet::new(),
            emergency: None,
            automation_enabled: true,
            metrics: PerformanceMetrics::default(),
            history: VecDeque::with_capacity(config.scheduler.task_history_retention),
            history_retention: config.scheduler.task_history_retention.max(1),
            next_task_id: 1,
        }
    }

    /// Clear transient scheduling state: emergency mode, due flags and
    /// pending events. Strategies, tasks, history and metrics are kept.
    pub fn reset(&mut self) {
        self.emergency = None;
        self.pending_events.clear();
        for task in self.tasks.values_mut() {
            if matches!(task.state, TaskState::Due | TaskState::Executing) {
                task.state = TaskState::Idle;
            }
        }
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut StrategyRegistry {
        &mut self.registry
    }

    pub fn monitor(&self) -> &MarketConditionMonitor {
        &self.monitor
    }

    pub fn executor(&self) -> &RebalanceExecutor {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut RebalanceExecutor {
        &mut self.executor
    }

    pub fn metrics(&self) -> &PerformanceMetrics {
        &self.metrics
    }

    pub fn restore_metrics(&mut self, metrics: PerformanceMetrics) {
        self.metrics = metrics;
    }

    pub fn emergency(&self) -> Option<&EmergencyTrigger> {
        self.emergency.as_ref()
    }

    pub fn in_emergency(&self) -> bool {
        self.emergency.is_some()
    }

    /// Leave emergency mode. Returns whether it was on.
    pub fn clear_emergency(&mut self) -> bool {
        let was_on = self.emergency.take().is_some();
        if was_on {
            RiskAlert::emergency_cleared().emit();
        }
        was_on
    }

    pub fn automation_enabled(&self) -> bool {
        self.automation_enabled
    }

    pub fn set_automation_enabled(&mut self, enabled: bool) {
        info!(enabled, "Automation toggled");
        self.automation_enabled = enabled;
    }

    pub fn add_task(&mut self, definition: TaskDefinition) -> Result<TaskId, ValidationError> {
        definition.validate()?;
        let id = self.next_task_id;
        self.next_task_id += 1;
        info!(
            task_id = id,
            kind = %definition.kind,
            trigger = ?definition.trigger,
            priority = definition.priority,
            "Task created"
        );
        self.tasks.insert(id, AutomationTask::new(id, definition));
        Ok(id)
    }

    pub fn update_task(&mut self, id: TaskId, definition: TaskDefinition) -> RebalancerResult<()> {
        definition.validate()?;
        let task = self.tasks.get_mut(&id).ok_or(RebalancerError::TaskNotFound(id))?;
        task.apply(definition);
        info!(task_id = id, "Task updated");
        Ok(())
    }

    pub fn deactivate_task(&mut self, id: TaskId) -> RebalancerResult<()> {
        let task = self.tasks.get_mut(&id).ok_or(RebalancerError::TaskNotFound(id))?;
        task.active = false;
        task.state = TaskState::Deactivated;
        self.pending_events.remove(&id);
        info!(task_id = id, "Task deactivated");
        Ok(())
    }

    pub fn reactivate_task(&mut self, id: TaskId) -> RebalancerResult<()> {
        let task = self.tasks.get_mut(&id).ok_or(RebalancerError::TaskNotFound(id))?;
        task.active = true;
        task.state = TaskState::Idle;
        info!(task_id = id, "Task reactivated");
        Ok(())
    }

    /// Raise an event for an event-triggered task.
    pub fn raise_event(&mut self, id: TaskId) -> RebalancerResult<()> {
        let task = self.tasks.get(&id).ok_or(RebalancerError::TaskNotFound(id))?;
        if !task.active {
            return Err(RebalancerError::TaskDeactivated(id));
        }
        self.pending_events.insert(id);
        debug!(task_id = id, "Event raised");
        Ok(())
    }

    pub fn task(&self, id: TaskId) -> Option<&AutomationTask> {
        self.tasks.get(&id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &AutomationTask> {
        self.tasks.values()
    }

    /// Re-insert a persisted task without changing its id.
    pub fn restore_task(&mut self, task: AutomationTask) {
        self.next_task_id = self.next_task_id.max(task.id + 1);
        self.tasks.insert(task.id, task);
    }

    /// Ids of tasks currently due, ascending.
    pub fn due_tasks(&self) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|t| t.state == TaskState::Due)
            .map(|t| t.id)
            .collect()
    }

    /// Up to `limit` most recent task executions, newest first.
    pub fn task_history(&self, limit: usize) -> Vec<TaskExecution> {
        self.history.iter().rev().take(limit).cloned().collect()
    }

    /// Due tasks in execution order.
    fn execution_queue(&self) -> Vec<TaskId> {
        let due = self.tasks.values().filter(|t| t.active && t.state == TaskState::Due);
        if self.in_emergency() {
            let (urgent, rest): (Vec<&AutomationTask>, Vec<&AutomationTask>) =
                due.partition(|t| t.is_emergency());
            urgent.into_iter().chain(rest).map(|t| t.id).collect()
        } else {
            due.map(|t| t.id).collect()
        }
    }

    fn push_history(&mut self, execution: TaskExecution) {
        if self.history.len() == self.history_retention {
            self.history.pop_front();
        }
        self.history.push_back(execution);
    }
}

/// Market-wide values that threshold triggers compare against.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickSignals {
    /// Largest deviation from target over active strategies
    pub max_deviation: Decimal,
    pub max_risk: Decimal,
    pub max_yield_spread: Decimal,
}

impl TickSignals {
    /// The metric a threshold trigger of `kind` compares against.
    pub fn metric(&self, kind: TaskKind) -> Decimal {
        match kind {
            TaskKind::Rebalance => self.max_deviation,
            TaskKind::RiskAssessment | TaskKind::EmergencyResponse => self.max_risk,
            TaskKind::Compound | TaskKind::RevenueDistribution => self.max_yield_spread,
        }
    }
}

/// Summary of one tick.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub timestamp: DateTime<Utc>,
    /// True when automation was disabled and nothing ran
    pub skipped: bool,
    pub refreshed_assets: Vec<String>,
    pub emergency: bool,
    pub signals: TickSignals,
    pub executed: Vec<TaskExecution>,
    /// Tasks left due for the next tick
    pub still_due: Vec<TaskId>,
}

/// Drives automation tasks on an external cadence.
pub struct TaskScheduler {
    config: SchedulerConfig,
    context: Mutex<SchedulerContext>,
    /// Held for the duration of a tick or forced execution
    running: Mutex<()>,
    pub(super) collaborators: Collaborators,
    pub(super) optimizer: AllocationOptimizer,
    pub(super) gate: RebalanceGate,
    /// Risk score at which risk assessments raise alerts
    pub(super) risk_alert_level: Decimal,
}

impl TaskScheduler {
    pub fn new(config: &Config, collaborators: Collaborators) -> Self {
        Self {
            config: config.scheduler.clone(),
            context: Mutex::new(SchedulerContext::new(config)),
            running: Mutex::new(()),
            collaborators,
            optimizer: AllocationOptimizer::new(config.optimizer.clone()),
            gate: RebalanceGate::new(config.gate.clone()),
            risk_alert_level: config.gate.emergency_threshold,
        }
    }

    /// Exclusive access to the scheduler state; waits for a running tick.
    pub async fn context(&self) -> MutexGuard<'_, SchedulerContext> {
        self.context.lock().await
    }

    pub fn tick_interval_secs(&self) -> u64 {
        self.config.tick_interval_secs
    }

    /// Run one scheduler tick.
    ///
    /// Fails only with `TickInProgress`; task failures are recorded in the
    /// report and never propagate.
    pub async fn run_tick(&self, now: DateTime<Utc>) -> RebalancerResult<TickReport> {
        let _running = self.admit()?;
        let mut ctx = self.context.lock().await;

        if !ctx.automation_enabled {
            debug!("Automation disabled, skipping tick");
            ctx.metrics.record_tick(true);
            return Ok(TickReport {
                timestamp: now,
                skipped: true,
                refreshed_assets: Vec::new(),
                emergency: ctx.in_emergency(),
                signals: TickSignals::default(),
                executed: Vec::new(),
                still_due: ctx.due_tasks(),
            });
        }

        let refreshed_assets = self.refresh_markets(&mut ctx, now).await;
        self.check_emergency(&mut ctx);
        let signals = self.collect_signals(&ctx).await;
        self.mark_due(&mut ctx, &signals, now);

        let queue = ctx.execution_queue();
        let mut executed = Vec::new();
        for task_id in queue.into_iter().take(self.config.max_tasks_per_tick) {
            executed.push(self.execute_task(&mut ctx, task_id, now, false).await);
        }

        let failures = executed.iter().filter(|e| !e.success).count();
        ctx.metrics.record_tick(failures == 0);
        let still_due = ctx.due_tasks();

        info!(
            executed = executed.len(),
            failures,
            still_due = still_due.len(),
            emergency = ctx.in_emergency(),
            uptime = %ctx.metrics.uptime_ratio(),
            "Tick complete"
        );

        Ok(TickReport {
            timestamp: now,
            skipped: false,
            refreshed_assets,
            emergency: ctx.in_emergency(),
            signals,
            executed,
            still_due,
        })
    }

    /// Run a task's handler now, bypassing its trigger.
    pub async fn force_execute(
        &self,
        task_id: TaskId,
        now: DateTime<Utc>,
    ) -> RebalancerResult<TaskExecution> {
        let _running = self.admit()?;
        let mut ctx = self.context.lock().await;
        let task = ctx
            .tasks
            .get(&task_id)
            .ok_or(RebalancerError::TaskNotFound(task_id))?;
        if !task.active {
            return Err(RebalancerError::TaskDeactivated(task_id));
        }
        info!(task_id, "Force executing task");
        Ok(self.execute_task(&mut ctx, task_id, now, true).await)
    }

    fn admit(&self) -> RebalancerResult<MutexGuard<'_, ()>> {
        self.running
            .try_lock()
            .map_err(|_| RebalancerError::TickInProgress)
    }

    /// Active tasks with their next scheduled run, soonest first.
    /// On-demand tasks (no interval) sort last.
    pub async fn next_executions(&self, now: DateTime<Utc>) -> Vec<ScheduledExecution> {
        let ctx = self.context.lock().await;
        let mut entries: Vec<ScheduledExecution> = ctx
            .tasks
            .values()
            .filter(|t| t.active)
            .map(|t| ScheduledExecution {
                task_id: t.id,
                kind: t.kind,
                trigger: t.trigger,
                priority: t.priority,
                state: t.state,
                next_execution: if t.state == TaskState::Due {
                    Some(now)
                } else {
                    t.next_execution(now)
                },
            })
            .collect();
        entries.sort_by(|a, b| match (a.next_execution, b.next_execution) {
            (Some(x), Some(y)) => x.cmp(&y).then(a.task_id.cmp(&b.task_id)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.task_id.cmp(&b.task_id),
        });
        entries
    }

    /// Refresh every asset with an active strategy. Oracle reads run
    /// concurrently; results are applied in asset order.
    async fn refresh_markets(&self, ctx: &mut SchedulerContext, now: DateTime<Utc>) -> Vec<String> {
        let assets: Vec<(String, Vec<String>)> = ctx
            .registry
            .active_assets()
            .into_iter()
            .map(|asset| {
                let venues = ctx.registry.venues_for(&asset).into_iter().collect();
                (asset, venues)
            })
            .collect();

        let observations =
            join_all(assets.iter().map(|(asset, venues)| self.observe(asset, venues))).await;

        let mut refreshed = Vec::with_capacity(assets.len());
        for ((asset, _), result) in assets.iter().zip(observations) {
            match result {
                Ok((observation, metrics)) => {
                    ctx.monitor.refresh(asset, &observation, now);
                    ctx.venue_metrics.insert(asset.clone(), metrics);
                    refreshed.push(asset.clone());
                }
                Err(e) => {
                    warn!(%asset, error = %e, "Market refresh failed, keeping previous snapshot");
                }
            }
        }
        refreshed
    }

    async fn observe(
        &self,
        asset: &str,
        venues: &[String],
    ) -> anyhow::Result<(MarketObservation, Vec<VenueMetrics>)> {
        let price = self.collaborators.prices.price(asset).await?;
        let trading_volume = self.collaborators.prices.trading_volume(asset).await?;
        let liquidity_depth = self.collaborators.prices.liquidity_depth(asset).await?;
        let external_risk = self.collaborators.risk.risk_score(asset).await?;

        let mut metrics = Vec::with_capacity(venues.len());
        for venue in venues {
            metrics.push(self.collaborators.venues.venue_metrics(asset, venue).await?);
        }

        let yields = metrics.iter().map(|m| m.current_yield);
        let yield_spread = match (yields.clone().max(), yields.min()) {
            (Some(hi), Some(lo)) => hi - lo,
            _ => Decimal::ZERO,
        };

        Ok((
            MarketObservation {
                price,
                trading_volume,
                liquidity_depth,
                yield_spread,
                external_risk,
            },
            metrics,
        ))
    }

    /// Enter emergency mode if the predicate trips. Sticky until cleared.
    fn check_emergency(&self, ctx: &mut SchedulerContext) {
        if ctx.in_emergency() {
            return;
        }
        if let Some(trigger) = ctx.monitor.detect_emergency() {
            warn!(asset = %trigger.asset, reason = ?trigger.reason, "Entering emergency mode");
            RiskAlert::emergency_activated(&trigger).emit();
            ctx.emergency = Some(trigger);
        }
    }

    async fn collect_signals(&self, ctx: &SchedulerContext) -> TickSignals {
        let mut signals = TickSignals::default();
        for snapshot in ctx.monitor.snapshots() {
            signals.max_risk = signals.max_risk.max(snapshot.risk_score);
            signals.max_yield_spread = signals.max_yield_spread.max(snapshot.yield_spread);
        }

        let needs_deviation = ctx.tasks.values().any(|t| {
            t.active && t.state == TaskState::Idle && t.kind == TaskKind::Rebalance && t.trigger.needs_threshold()
        });
        if !needs_deviation {
            return signals;
        }

        for strategy in ctx.registry.active() {
            let live = match read_allocation(self.collaborators.venues.as_ref(), strategy).await {
                Ok(live) => live,
                Err(e) => {
                    warn!(strategy_id = strategy.id, error = %e, "Could not read allocation");
                    continue;
                }
            };
            let Some(snapshot) = ctx.monitor.snapshot(&strategy.asset) else {
                continue;
            };
            let metrics = ctx
                .venue_metrics
                .get(&strategy.asset)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let target = self.optimizer.compute_target(strategy, snapshot, metrics);
            signals.max_deviation = signals.max_deviation.max(live.allocation.deviation(&target));
        }
        signals
    }

    /// Flag idle tasks whose trigger holds. Due stays set until the task runs.
    fn mark_due(&self, ctx: &mut SchedulerContext, signals: &TickSignals, now: DateTime<Utc>) {
        let emergency = ctx.in_emergency();
        let pending = &ctx.pending_events;
        for task in ctx.tasks.values_mut() {
            if !task.active || task.state != TaskState::Idle {
                continue;
            }
            let metric = signals.metric(task.kind);
            let due = match task.trigger {
                TriggerKind::TimeBased => task.interval_elapsed(now),
                TriggerKind::ThresholdBased => metric >= task.threshold,
                TriggerKind::EventBased => pending.contains(&task.id),
                TriggerKind::ConditionBased => {
                    task.interval_elapsed(now) && metric >= task.threshold
                }
                TriggerKind::EmergencyBased => emergency,
            };
            if due {
                debug!(task_id = task.id, kind = %task.kind, "Task due");
                task.state = TaskState::Due;
            }
        }
    }

    /// Run one task with failure isolation and bookkeeping.
    async fn execute_task(
        &self,
        ctx: &mut SchedulerContext,
        task_id: TaskId,
        now: DateTime<Utc>,
        forced: bool,
    ) -> TaskExecution {
        let task = match ctx.tasks.get_mut(&task_id) {
            Some(task) => {
                task.state = TaskState::Executing;
                task.clone()
            }
            None => {
                return TaskExecution {
                    task_id,
                    kind: TaskKind::Rebalance,
                    timestamp: now,
                    success: false,
                    resource_cost: Decimal::ZERO,
                    detail: String::new(),
                    error: Some(format!("task {} not found", task_id)),
                    forced,
                };
            }
        };

        debug!(task_id, kind = %task.kind, forced, "Executing task");
        let outcome = AssertUnwindSafe(self.run_handler(ctx, &task, now))
            .catch_unwind()
            .await;

        let (success, resource_cost, detail, error) = match outcome {
            Ok(Ok(outcome)) => (true, outcome.cost, outcome.detail, None),
            Ok(Err(e)) => (false, Decimal::ZERO, String::new(), Some(format!("{:#}", e))),
            Err(panic) => (
                false,
                Decimal::ZERO,
                String::new(),
                Some(format!("handler panicked: {}", panic_message(panic.as_ref()))),
            ),
        };

        if let Some(t) = ctx.tasks.get_mut(&task_id) {
            t.last_execution = Some(now);
            t.execution_count += 1;
            t.state = if t.active {
                TaskState::Idle
            } else {
                TaskState::Deactivated
            };
        }
        ctx.pending_events.remove(&task_id);
        ctx.metrics.record_execution(success, resource_cost);

        match &error {
            None => info!(task_id, kind = %task.kind, %resource_cost, %detail, "Task executed"),
            Some(message) => {
                error!(task_id, kind = %task.kind, error = %message, "Task failed");
                RiskAlert::task_failed(task_id, task.kind, message).emit();
            }
        }

        let execution = TaskExecution {
            task_id,
            kind: task.kind,
            timestamp: now,
            success,
            resource_cost,
            detail,
            error,
            forced,
        };
        ctx.push_history(execution.clone());
        execution
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
