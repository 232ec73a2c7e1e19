//! Automation task model.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;
use crate::strategy::StrategyId;

pub type TaskId = u64;

pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;

/// Upper bound on task intervals (100 years).
const MAX_INTERVAL_SECS: i64 = 100 * 365 * 24 * 60 * 60;

/// What a task does when it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Rebalance,
    Compound,
    RevenueDistribution,
    RiskAssessment,
    EmergencyResponse,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Rebalance => write!(f, "REBALANCE"),
            TaskKind::Compound => write!(f, "COMPOUND"),
            TaskKind::RevenueDistribution => write!(f, "REVENUE_DISTRIBUTION"),
            TaskKind::RiskAssessment => write!(f, "RISK_ASSESSMENT"),
            TaskKind::EmergencyResponse => write!(f, "EMERGENCY_RESPONSE"),
        }
    }
}

/// When a task becomes due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Interval elapsed since the last execution
    TimeBased,
    /// Kind-specific market metric reaches the threshold
    ThresholdBased,
    /// An event was raised for the task
    EventBased,
    /// Interval elapsed and the threshold holds
    ConditionBased,
    /// Global emergency mode is on
    EmergencyBased,
}

impl TriggerKind {
    pub(crate) fn needs_interval(self) -> bool {
        matches!(self, TriggerKind::TimeBased | TriggerKind::ConditionBased)
    }

    pub(crate) fn needs_threshold(self) -> bool {
        matches!(self, TriggerKind::ThresholdBased | TriggerKind::ConditionBased)
    }
}

/// Scheduling state. `Deactivated` is terminal until an operator reactivates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Idle,
    Due,
    Executing,
    Deactivated,
}

/// Operator-supplied task parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub kind: TaskKind,
    pub trigger: TriggerKind,
    #[serde(default)]
    pub interval_secs: u64,
    #[serde(default)]
    pub threshold: Decimal,
    pub priority: u8,
    /// Cost ceiling per run; zero means unlimited
    #[serde(default)]
    pub resource_budget: Decimal,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl TaskDefinition {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&self.priority) {
            return Err(ValidationError::InvalidTask(format!(
                "priority {} outside {}..={}",
                self.priority, MIN_PRIORITY, MAX_PRIORITY
            )));
        }
        if self.trigger.needs_interval() && self.interval_secs == 0 {
            return Err(ValidationError::InvalidTask(format!(
                "{:?} trigger needs a positive interval",
                self.trigger
            )));
        }
        if self.trigger.needs_threshold() && self.threshold <= Decimal::ZERO {
            return Err(ValidationError::InvalidTask(format!(
                "{:?} trigger needs a positive threshold",
                self.trigger
            )));
        }
        if self.resource_budget < Decimal::ZERO {
            return Err(ValidationError::InvalidTask(
                "resource budget cannot be negative".to_string(),
            ));
        }
        if !(self.payload.is_null() || self.payload.is_object()) {
            return Err(ValidationError::InvalidTask(
                "payload must be a JSON object".to_string(),
            ));
        }
        Ok(())
    }
}

/// A scheduled unit of automation work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationTask {
    pub id: TaskId,
    pub kind: TaskKind,
    pub trigger: TriggerKind,
    pub interval_secs: u64,
    pub threshold: Decimal,
    pub priority: u8,
    pub resource_budget: Decimal,
    pub payload: serde_json::Value,
    pub last_execution: Option<DateTime<Utc>>,
    pub execution_count: u64,
    pub active: bool,
    pub state: TaskState,
}

impl AutomationTask {
    pub fn new(id: TaskId, definition: TaskDefinition) -> Self {
        Self {
            id,
            kind: definition.kind,
            trigger: definition.trigger,
            interval_secs: definition.interval_secs,
            threshold: definition.threshold,
            priority: definition.priority,
            resource_budget: definition.resource_budget,
            payload: definition.payload,
            last_execution: None,
            execution_count: 0,
            active: true,
            state: TaskState::Idle,
        }
    }

    pub fn definition(&self) -> TaskDefinition {
        TaskDefinition {
            kind: self.kind,
            trigger: self.trigger,
            interval_secs: self.interval_secs,
            threshold: self.threshold,
            priority: self.priority,
            resource_budget: self.resource_budget,
            payload: self.payload.clone(),
        }
    }

    /// Replace the editable parameters, keeping history and state.
    pub fn apply(&mut self, definition: TaskDefinition) {
        self.kind = definition.kind;
        self.trigger = definition.trigger;
        self.interval_secs = definition.interval_secs;
        self.threshold = definition.threshold;
        self.priority = definition.priority;
        self.resource_budget = definition.resource_budget;
        self.payload = definition.payload;
    }

    fn interval(&self) -> Duration {
        let secs = i64::try_from(self.interval_secs).unwrap_or(MAX_INTERVAL_SECS);
        Duration::seconds(secs.min(MAX_INTERVAL_SECS))
    }

    /// True if never executed or at least one interval has passed.
    pub fn interval_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.last_execution
            .map_or(true, |last| now >= last + self.interval())
    }

    /// Earliest time a time-gated task can run next; `None` for on-demand triggers.
    pub fn next_execution(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.active || !self.trigger.needs_interval() {
            return None;
        }
        Some(match self.last_execution {
            Some(last) => (last + self.interval()).max(now),
            None => now,
        })
    }

    /// True for tasks that jump the queue in emergency mode.
    pub fn is_emergency(&self) -> bool {
        self.kind == TaskKind::EmergencyResponse || self.trigger == TriggerKind::EmergencyBased
    }

    /// Optional `"strategy_ids"` filter from the payload.
    pub fn strategy_filter(&self) -> Option<Vec<StrategyId>> {
        self.payload
            .get("strategy_ids")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Optional `"assets"` filter from the payload.
    pub fn asset_filter(&self) -> Option<Vec<String>> {
        self.payload
            .get("assets")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Outcome of one task run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExecution {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub resource_cost: Decimal,
    pub detail: String,
    pub error: Option<String>,
    /// Run by an operator outside trigger evaluation
    pub forced: bool,
}

/// Scheduled-next-execution entry for operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledExecution {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub trigger: TriggerKind,
    pub priority: u8,
    pub state: TaskState,
    pub next_execution: Option<DateTime<Utc>>,
}
