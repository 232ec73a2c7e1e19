//! # Yield Rebalancer
//!
//! Strategy engine that keeps capital spread across yield venues close to
//! an optimized target, plus an automation scheduler that runs rebalance,
//! compounding, revenue distribution, risk assessment and emergency tasks.
//!
//! ## Architecture
//!
//! - `config`: Configuration loading and validation
//! - `venue`: Oracle, venue gateway and yield-operation interfaces
//! - `market`: Market condition monitoring and the emergency predicate
//! - `strategy`: Strategy registry, optimizer, gate and executor
//! - `automation`: Task model and the tick-driven scheduler
//! - `operator`: Role-gated operator and monitoring API
//! - `persistence`: SQLite-backed state persistence
//! - `utils`: Shared decimal arithmetic

pub mod automation;
pub mod config;
pub mod error;
pub mod market;
pub mod operator;
pub mod persistence;
pub mod strategy;
pub mod utils;
pub mod venue;

pub use config::Config;
pub use error::{RebalancerError, RebalancerResult};
