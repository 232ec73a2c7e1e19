//! Error types for strategy and automation operations.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::automation::TaskId;
use crate::strategy::StrategyId;

/// A strategy or task definition was rejected before any state changed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("venue/allocation arrays differ in length: venues={venues} target={target} min={min} max={max}")]
    LengthMismatch {
        venues: usize,
        target: usize,
        min: usize,
        max: usize,
    },

    #[error("strategy targets {count} venues, limit is {max}")]
    TooManyVenues { count: usize, max: usize },

    #[error("slippage tolerance {requested} exceeds ceiling {ceiling}")]
    SlippageAboveCeiling { requested: Decimal, ceiling: Decimal },

    #[error("target allocation sums to {0}, expected exactly 1")]
    TargetSumNotOne(Decimal),

    #[error("target {target} for venue #{index} outside [{min}, {max}]")]
    TargetOutOfBounds {
        index: usize,
        target: Decimal,
        min: Decimal,
        max: Decimal,
    },

    #[error("invalid task definition: {0}")]
    InvalidTask(String),
}

/// Errors surfaced by the operator API and the scheduler boundary.
#[derive(Debug, Error)]
pub enum RebalancerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("strategy not found: {0}")]
    StrategyNotFound(StrategyId),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("task {0} is deactivated")]
    TaskDeactivated(TaskId),

    #[error("a tick is already in progress")]
    TickInProgress,

    #[error("{caller} is not permitted to {action}")]
    Unauthorized { caller: String, action: String },
}

/// Result type for rebalancer operations.
pub type RebalancerResult<T> = Result<T, RebalancerError>;
