//! Market condition monitoring.
//!
//! Derives per-asset volatility, trend, liquidity and a composite risk
//! score from oracle observations, and evaluates the global emergency
//! predicate over the latest snapshots.

mod monitor;

pub use monitor::{
    EmergencyReason, EmergencyTrigger, MarketConditionMonitor, MarketSnapshot, PriceBuffer,
};
