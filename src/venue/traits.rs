//! Collaborator interfaces the engine consumes.
//!
//! Oracles, venue transfers and yield side effects live outside this crate.
//! These traits are the minimum contract the strategy engine and the
//! scheduler need from them.

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::VenueMetrics;

/// Point-in-time market reads for an asset.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Current reference price.
    async fn price(&self, asset: &str) -> anyhow::Result<Decimal>;

    /// Recent trading volume in asset units.
    async fn trading_volume(&self, asset: &str) -> anyhow::Result<Decimal>;

    /// Aggregate liquidity depth in asset units.
    async fn liquidity_depth(&self, asset: &str) -> anyhow::Result<Decimal>;
}

/// External risk assessment for an asset.
#[async_trait]
pub trait RiskOracle: Send + Sync {
    /// Risk score on a 0-100 scale.
    async fn risk_score(&self, asset: &str) -> anyhow::Result<Decimal>;
}

/// Access to the venues that hold managed capital.
#[async_trait]
pub trait VenueGateway: Send + Sync {
    /// Metrics for one venue's market in `asset`.
    async fn venue_metrics(&self, asset: &str, venue: &str) -> anyhow::Result<VenueMetrics>;

    /// Amount of `asset` currently deployed in `venue`.
    async fn balance(&self, asset: &str, venue: &str) -> anyhow::Result<Decimal>;

    /// Move `amount` of `asset` between venues.
    ///
    /// Atomic: either the whole amount moves or nothing does. Returns the
    /// realized slippage as a fraction of `amount`.
    async fn transfer_between_venues(
        &self,
        asset: &str,
        amount: Decimal,
        from: &str,
        to: &str,
    ) -> anyhow::Result<Decimal>;
}

/// Opaque side actions invoked by scheduled tasks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait YieldOperations: Send + Sync {
    /// Distribute accrued revenue for an asset.
    async fn distribute_revenue(&self, asset: &str) -> anyhow::Result<()>;

    /// Compound accrued yield across all venues.
    async fn compound_yield(&self) -> anyhow::Result<()>;
}
