//! Automation scheduler.
//!
//! Tasks (rebalance, compound, revenue distribution, risk assessment and
//! emergency response) are evaluated against their triggers on every tick
//! and run sequentially under a per-tick cap.

mod alert;
mod handlers;
mod metrics;
mod scheduler;
mod task;

pub use alert::{AlertKind, AlertSeverity, RiskAlert};
pub use handlers::HandlerOutcome;
pub use metrics::PerformanceMetrics;
pub use scheduler::{Collaborators, SchedulerContext, TaskScheduler, TickReport, TickSignals};
pub use task::{
    AutomationTask, ScheduledExecution, TaskDefinition, TaskExecution, TaskId, TaskKind,
    TaskState, TriggerKind, MAX_PRIORITY, MIN_PRIORITY,
};
