//! Operator and monitoring surface.
//!
//! Every mutating call passes through an injected [`Authorizer`] before it
//! touches scheduler state. Reads are unrestricted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::automation::{
    PerformanceMetrics, ScheduledExecution, TaskDefinition, TaskExecution, TaskId, TaskScheduler,
};
use crate::error::{RebalancerError, RebalancerResult};
use crate::market::{EmergencyTrigger, MarketSnapshot};
use crate::strategy::{ExecutionRecord, Strategy, StrategyDefinition, StrategyId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Operator,
    /// Automation bot allowed to poke tasks but not to edit them
    Keeper,
    Viewer,
}

/// Who is calling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub name: String,
    pub role: Role,
}

impl Caller {
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }
}

/// Mutating operations subject to authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    ManageStrategies,
    ManageTasks,
    ForceExecute,
    RaiseEvent,
    ToggleAutomation,
    ClearEmergency,
    Reset,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::ManageStrategies => "manage strategies",
            Action::ManageTasks => "manage tasks",
            Action::ForceExecute => "force-execute tasks",
            Action::RaiseEvent => "raise task events",
            Action::ToggleAutomation => "toggle automation",
            Action::ClearEmergency => "clear emergency mode",
            Action::Reset => "reset the scheduler",
        };
        f.write_str(name)
    }
}

/// Permission check injected at the API boundary.
pub trait Authorizer: Send + Sync {
    fn authorize(&self, caller: &Caller, action: Action) -> bool;
}

/// Fixed role table.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleAuthorizer;

impl Authorizer for RoleAuthorizer {
    fn authorize(&self, caller: &Caller, action: Action) -> bool {
        match caller.role {
            Role::Admin => true,
            Role::Operator => !matches!(action, Action::ClearEmergency | Action::Reset),
            Role::Keeper => matches!(action, Action::ForceExecute | Action::RaiseEvent),
            Role::Viewer => false,
        }
    }
}

/// Role-gated operations over a running scheduler.
pub struct OperatorApi {
    scheduler: Arc<TaskScheduler>,
    authorizer: Arc<dyn Authorizer>,
}

impl OperatorApi {
    pub fn new(scheduler: Arc<TaskScheduler>, authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            scheduler,
            authorizer,
        }
    }

    fn check(&self, caller: &Caller, action: Action) -> RebalancerResult<()> {
        if self.authorizer.authorize(caller, action) {
            Ok(())
        } else {
            warn!(caller = %caller.name, role = ?caller.role, %action, "Unauthorized operator call");
            Err(RebalancerError::Unauthorized {
                caller: caller.name.clone(),
                action: action.to_string(),
            })
        }
    }

    // Strategies

    pub async fn create_strategy(
        &self,
        caller: &Caller,
        definition: StrategyDefinition,
    ) -> RebalancerResult<StrategyId> {
        self.check(caller, Action::ManageStrategies)?;
        let id = self.scheduler.context().await.registry_mut().create(definition)?;
        info!(caller = %caller.name, strategy_id = id, "Strategy created by operator");
        Ok(id)
    }

    pub async fn update_strategy(
        &self,
        caller: &Caller,
        id: StrategyId,
        definition: StrategyDefinition,
    ) -> RebalancerResult<()> {
        self.check(caller, Action::ManageStrategies)?;
        self.scheduler
            .context()
            .await
            .registry_mut()
            .update(id, definition)
    }

    pub async fn set_strategy_active(
        &self,
        caller: &Caller,
        id: StrategyId,
        active: bool,
    ) -> RebalancerResult<()> {
        self.check(caller, Action::ManageStrategies)?;
        let mut ctx = self.scheduler.context().await;
        if active {
            ctx.registry_mut().reactivate(id)
        } else {
            ctx.registry_mut().deactivate(id)
        }
    }

    /// Release a strategy from its emergency allocation.
    pub async fn clear_strategy_emergency(
        &self,
        caller: &Caller,
        id: StrategyId,
    ) -> RebalancerResult<()> {
        self.check(caller, Action::ManageStrategies)?;
        self.scheduler
            .context()
            .await
            .registry_mut()
            .clear_emergency(id)
    }

    // Tasks

    pub async fn create_task(
        &self,
        caller: &Caller,
        definition: TaskDefinition,
    ) -> RebalancerResult<TaskId> {
        self.check(caller, Action::ManageTasks)?;
        Ok(self.scheduler.context().await.add_task(definition)?)
    }

    pub async fn update_task(
        &self,
        caller: &Caller,
        id: TaskId,
        definition: TaskDefinition,
    ) -> RebalancerResult<()> {
        self.check(caller, Action::ManageTasks)?;
        self.scheduler.context().await.update_task(id, definition)
    }

    pub async fn set_task_active(
        &self,
        caller: &Caller,
        id: TaskId,
        active: bool,
    ) -> RebalancerResult<()> {
        self.check(caller, Action::ManageTasks)?;
        let mut ctx = self.scheduler.context().await;
        if active {
            ctx.reactivate_task(id)
        } else {
            ctx.deactivate_task(id)
        }
    }

    pub async fn raise_event(&self, caller: &Caller, id: TaskId) -> RebalancerResult<()> {
        self.check(caller, Action::RaiseEvent)?;
        self.scheduler.context().await.raise_event(id)
    }

    pub async fn force_execute(
        &self,
        caller: &Caller,
        id: TaskId,
        now: DateTime<Utc>,
    ) -> RebalancerResult<TaskExecution> {
        self.check(caller, Action::ForceExecute)?;
        info!(caller = %caller.name, task_id = id, "Force execution requested");
        self.scheduler.force_execute(id, now).await
    }

    // Global switches

    pub async fn set_automation_enabled(
        &self,
        caller: &Caller,
        enabled: bool,
    ) -> RebalancerResult<()> {
        self.check(caller, Action::ToggleAutomation)?;
        self.scheduler
            .context()
            .await
            .set_automation_enabled(enabled);
        Ok(())
    }

    /// Leave global emergency mode. Returns whether it was on.
    pub async fn clear_emergency(&self, caller: &Caller) -> RebalancerResult<bool> {
        self.check(caller, Action::ClearEmergency)?;
        info!(caller = %caller.name, "Emergency clear requested");
        Ok(self.scheduler.context().await.clear_emergency())
    }

    /// Drops emergency mode, pending events and due marks. Strategies, tasks and
    /// history are kept.
    pub async fn reset_scheduler(&self, caller: &Caller) -> RebalancerResult<()> {
        self.check(caller, Action::Reset)?;
        warn!(caller = %caller.name, "Scheduler reset requested");
        self.scheduler.context().await.reset();
        Ok(())
    }

    // Reads

    pub async fn strategy(&self, id: StrategyId) -> Option<Strategy> {
        self.scheduler.context().await.registry().get(id).cloned()
    }

    pub async fn strategies(&self) -> Vec<Strategy> {
        self.scheduler
            .context()
            .await
            .registry()
            .list()
            .cloned()
            .collect()
    }

    pub async fn market_snapshot(&self, asset: &str) -> Option<MarketSnapshot> {
        self.scheduler
            .context()
            .await
            .monitor()
            .snapshot(asset)
            .cloned()
    }

    pub async fn execution_history(&self, id: StrategyId) -> Vec<ExecutionRecord> {
        self.scheduler.context().await.executor().ledger().history(id)
    }

    /// Up to `limit` retained executions across strategies, newest first.
    pub async fn recent_executions(&self, limit: usize) -> Vec<ExecutionRecord> {
        self.scheduler.context().await.executor().ledger().recent(limit)
    }

    pub async fn task_history(&self, limit: usize) -> Vec<TaskExecution> {
        self.scheduler.context().await.task_history(limit)
    }

    pub async fn performance_metrics(&self) -> PerformanceMetrics {
        self.scheduler.context().await.metrics().clone()
    }

    pub async fn emergency(&self) -> Option<EmergencyTrigger> {
        self.scheduler.context().await.emergency().cloned()
    }

    pub async fn next_executions(&self, now: DateTime<Utc>) -> Vec<ScheduledExecution> {
        self.scheduler.next_executions(now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::{Collaborators, TaskKind, TriggerKind};
    use crate::config::Config;
    use crate::strategy::sample_definition;
    use crate::venue::{MockVenueNetwork, VenueClass, VenueMetrics};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn api(network: &MockVenueNetwork) -> OperatorApi {
        let scheduler = Arc::new(TaskScheduler::new(
            &Config::default(),
            Collaborators::simulated(network),
        ));
        OperatorApi::new(scheduler, Arc::new(RoleAuthorizer))
    }

    fn compound_task() -> TaskDefinition {
        TaskDefinition {
            kind: TaskKind::Compound,
            trigger: TriggerKind::EventBased,
            interval_secs: 0,
            threshold: Decimal::ZERO,
            priority: 2,
            resource_budget: Decimal::ZERO,
            payload: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_role_table() {
        let auth = RoleAuthorizer;
        let keeper = Caller::new("bot", Role::Keeper);
        let operator = Caller::new("ops", Role::Operator);

        assert!(auth.authorize(&keeper, Action::ForceExecute));
        assert!(!auth.authorize(&keeper, Action::ManageTasks));
        assert!(auth.authorize(&operator, Action::ManageStrategies));
        assert!(!auth.authorize(&operator, Action::ClearEmergency));
        assert!(!auth.authorize(&operator, Action::Reset));
        assert!(auth.authorize(&Caller::new("root", Role::Admin), Action::ClearEmergency));
        assert!(!auth.authorize(&Caller::new("dash", Role::Viewer), Action::RaiseEvent));
    }

    #[tokio::test]
    async fn test_viewer_cannot_mutate() {
        let api = api(&MockVenueNetwork::new());
        let viewer = Caller::new("dashboard", Role::Viewer);

        let result = api.create_strategy(&viewer, sample_definition()).await;

        assert!(matches!(result, Err(RebalancerError::Unauthorized { .. })));
        assert!(api.strategies().await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_strategy_is_rejected_without_state_change() {
        let api = api(&MockVenueNetwork::new());
        let admin = Caller::new("root", Role::Admin);
        let mut definition = sample_definition();
        definition.target_allocation = vec![dec!(0.6), dec!(0.5)];

        let result = api.create_strategy(&admin, definition).await;

        assert!(matches!(result, Err(RebalancerError::Validation(_))));
        assert!(api.strategies().await.is_empty());
    }

    #[tokio::test]
    async fn test_keeper_force_executes_operator_task() {
        let network = MockVenueNetwork::new();
        let api = api(&network);
        let operator = Caller::new("ops", Role::Operator);
        let keeper = Caller::new("keeper", Role::Keeper);

        let task_id = api.create_task(&operator, compound_task()).await.unwrap();
        assert!(api.create_task(&keeper, compound_task()).await.is_err());

        let execution = api.force_execute(&keeper, task_id, Utc::now()).await.unwrap();

        assert!(execution.success);
        assert_eq!(network.compound_count().await, 1);
        assert_eq!(api.task_history(5).await.len(), 1);
        assert_eq!(api.performance_metrics().await.total_executions, 1);
    }

    #[tokio::test]
    async fn test_strategy_lifecycle_and_reads() {
        let network = MockVenueNetwork::new();
        network
            .add_venue("USDC", VenueMetrics::new("aave", VenueClass::Stable), dec!(5000))
            .await;
        network
            .add_venue("USDC", VenueMetrics::new("curve", VenueClass::Growth), dec!(5000))
            .await;
        let api = api(&network);
        let admin = Caller::new("root", Role::Admin);

        let id = api.create_strategy(&admin, sample_definition()).await.unwrap();
        api.set_strategy_active(&admin, id, false).await.unwrap();
        assert!(!api.strategy(id).await.unwrap().active);
        api.set_strategy_active(&admin, id, true).await.unwrap();
        assert!(api.strategy(id).await.unwrap().active);

        assert!(api.execution_history(id).await.is_empty());
        assert!(api.recent_executions(10).await.is_empty());
        assert!(api.market_snapshot("USDC").await.is_none());
        assert!(api.emergency().await.is_none());
        assert!(!api.clear_emergency(&admin).await.unwrap());
        assert!(matches!(
            api.set_strategy_active(&admin, 99, false).await,
            Err(RebalancerError::StrategyNotFound(99))
        ));
    }

    #[tokio::test]
    async fn test_reset_discards_pending_events() {
        let network = MockVenueNetwork::new();
        let api = api(&network);
        let admin = Caller::new("root", Role::Admin);
        let operator = Caller::new("ops", Role::Operator);
        let task_id = api.create_task(&operator, compound_task()).await.unwrap();
        api.raise_event(&operator, task_id).await.unwrap();

        assert!(matches!(
            api.reset_scheduler(&operator).await,
            Err(RebalancerError::Unauthorized { .. })
        ));
        api.reset_scheduler(&admin).await.unwrap();

        assert!(api.emergency().await.is_none());
        let report = api.scheduler.run_tick(Utc::now()).await.unwrap();
        assert!(report.executed.is_empty());
        assert_eq!(network.compound_count().await, 0);
    }

    #[tokio::test]
    async fn test_toggle_automation_and_task_deactivation() {
        let api = api(&MockVenueNetwork::new());
        let operator = Caller::new("ops", Role::Operator);
        let task_id = api.create_task(&operator, compound_task()).await.unwrap();

        api.set_automation_enabled(&operator, false).await.unwrap();
        api.set_task_active(&operator, task_id, false).await.unwrap();

        assert!(matches!(
            api.raise_event(&operator, task_id).await,
            Err(RebalancerError::TaskDeactivated(_))
        ));
        assert!(api.next_executions(Utc::now()).await.is_empty());
    }
}
