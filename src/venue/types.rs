//! Venue data types shared by the optimizer, gate and executor.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Risk class of a venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VenueClass {
    /// Lending markets, stable vaults
    Stable,
    /// Exchanges and yield aggregators with upside exposure
    Growth,
    /// Leveraged or experimental venues
    HighRisk,
}

impl fmt::Display for VenueClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VenueClass::Stable => write!(f, "STABLE"),
            VenueClass::Growth => write!(f, "GROWTH"),
            VenueClass::HighRisk => write!(f, "HIGH_RISK"),
        }
    }
}

/// Point-in-time metrics for one venue holding one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueMetrics {
    /// Venue identifier (e.g., "aave-v3")
    pub venue: String,
    pub class: VenueClass,
    /// Current annualized yield (0.05 = 5%)
    pub current_yield: Decimal,
    /// Projected annualized yield over the next period
    pub projected_yield: Decimal,
    /// Volatility of the venue's yield
    pub yield_volatility: Decimal,
    /// Venue risk score (0-100)
    pub risk_score: Decimal,
    /// Available liquidity in asset units
    pub liquidity_depth: Decimal,
    /// Fraction of venue liquidity already in use (0.0-1.0)
    pub utilization: Decimal,
    /// Price deviation of the venue from the reference price
    pub price_deviation: Decimal,
    /// Trading volume in asset units
    pub trading_volume: Decimal,
}

impl VenueMetrics {
    /// Create metrics with only a venue and class; all figures zero.
    pub fn new(venue: impl Into<String>, class: VenueClass) -> Self {
        Self {
            venue: venue.into(),
            class,
            current_yield: Decimal::ZERO,
            projected_yield: Decimal::ZERO,
            yield_volatility: Decimal::ZERO,
            risk_score: Decimal::ZERO,
            liquidity_depth: Decimal::ZERO,
            utilization: Decimal::ZERO,
            price_deviation: Decimal::ZERO,
            trading_volume: Decimal::ZERO,
        }
    }

    /// Set current and projected yield.
    pub fn with_yield(mut self, current: Decimal, projected: Decimal, volatility: Decimal) -> Self {
        self.current_yield = current;
        self.projected_yield = projected;
        self.yield_volatility = volatility;
        self
    }

    /// Set the venue risk score.
    pub fn with_risk(mut self, risk_score: Decimal) -> Self {
        self.risk_score = risk_score;
        self
    }

    /// Set liquidity depth and utilization.
    pub fn with_liquidity(mut self, depth: Decimal, utilization: Decimal) -> Self {
        self.liquidity_depth = depth;
        self.utilization = utilization;
        self
    }

    /// Set price deviation and trading volume.
    pub fn with_market(mut self, price_deviation: Decimal, trading_volume: Decimal) -> Self {
        self.price_deviation = price_deviation;
        self.trading_volume = trading_volume;
        self
    }
}

/// One raw observation of an asset's market, gathered from the oracles.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketObservation {
    pub price: Decimal,
    pub trading_volume: Decimal,
    pub liquidity_depth: Decimal,
    /// Max minus min current yield across the asset's venues
    pub yield_spread: Decimal,
    /// Risk input from the external risk collaborator (0-100)
    pub external_risk: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_venue_metrics_builder() {
        let metrics = VenueMetrics::new("aave", VenueClass::Stable)
            .with_yield(dec!(0.04), dec!(0.05), dec!(0.01))
            .with_risk(dec!(20))
            .with_liquidity(dec!(5_000_000), dec!(0.6));

        assert_eq!(metrics.venue, "aave");
        assert_eq!(metrics.projected_yield, dec!(0.05));
        assert_eq!(metrics.utilization, dec!(0.6));
        assert_eq!(metrics.trading_volume, Decimal::ZERO);
    }

    #[test]
    fn test_venue_class_display() {
        assert_eq!(VenueClass::HighRisk.to_string(), "HIGH_RISK");
    }
}
