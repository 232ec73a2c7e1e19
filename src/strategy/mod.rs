//! Strategy engine.
//!
//! Contains the core logic for:
//! - Strategy definitions and their lifecycle
//! - Target allocation scoring across venues
//! - Cooldown, deviation and emergency gating
//! - Transfer planning and execution bookkeeping

mod allocation;
mod executor;
mod gate;
mod ledger;
mod optimizer;
mod registry;

pub use allocation::AllocationVector;
pub use executor::{
    read_allocation, ExecutionRecord, ExecutionRequest, LiveAllocation, RebalanceExecutor,
    TransferInstruction, TransferLeg,
};
pub use gate::{GateDecision, RebalanceGate, RoutedTarget};
pub use ledger::ExecutionLedger;
pub use optimizer::AllocationOptimizer;
pub use registry::{
    AllocationAlgorithm, Strategy, StrategyDefinition, StrategyId, StrategyRegistry,
};

#[cfg(test)]
pub(crate) use registry::tests::two_venue_definition as sample_definition;
