//! Venue integrations consumed by the strategy engine.
//!
//! - `traits`: oracle, venue transfer and yield-operation interfaces
//! - `types`: per-venue metrics and raw market observations
//! - `mock`: in-memory network used for paper runs and tests

pub mod mock;
mod traits;
mod types;

pub use mock::MockVenueNetwork;
pub use traits::{PriceOracle, RiskOracle, VenueGateway, YieldOperations};
#[cfg(test)]
pub use traits::MockYieldOperations;
pub use types::*;
