//! Market condition sampling: volatility, trend, liquidity and composite risk.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{debug, info};

use crate::config::MonitorConfig;
use crate::utils::decimal::{
    clamp, mean, safe_div, saturating_sum, sqrt, to_basis_points, FRACTION_DP,
};
use crate::venue::MarketObservation;

/// Fixed-capacity ring of recent prices for one asset.
#[derive(Debug, Clone)]
pub struct PriceBuffer {
    samples: VecDeque<Decimal>,
    capacity: usize,
}

impl PriceBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a price, overwriting the oldest once full.
    pub fn push(&mut self, price: Decimal) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(price);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<Decimal> {
        self.samples.back().copied()
    }

    pub fn to_vec(&self) -> Vec<Decimal> {
        self.samples.iter().copied().collect()
    }

    /// Population standard deviation divided by the mean.
    ///
    /// Deviations are taken relative to the mean before squaring, so the
    /// result does not depend on the price scale. Zero with fewer than two
    /// samples or a zero mean.
    pub fn volatility(&self) -> Decimal {
        if self.samples.len() < 2 {
            return Decimal::ZERO;
        }
        let prices = self.to_vec();
        let avg = mean(&prices);
        if avg == Decimal::ZERO {
            return Decimal::ZERO;
        }
        let variance = safe_div(
            saturating_sum(prices.iter().map(|p| {
                let relative = safe_div(*p, avg).saturating_sub(Decimal::ONE);
                relative.saturating_mul(relative)
            })),
            Decimal::from(prices.len() as u64),
        );
        sqrt(variance).round_dp(FRACTION_DP)
    }

    /// (bullish, bearish): latest price above/below the mean by more than `band`.
    pub fn trend(&self, band: Decimal) -> (bool, bool) {
        if self.samples.len() < 2 {
            return (false, false);
        }
        let Some(latest) = self.latest() else {
            return (false, false);
        };
        let avg = mean(&self.to_vec());
        (
            latest > avg.saturating_mul(Decimal::ONE + band),
            latest < avg.saturating_mul(Decimal::ONE - band),
        )
    }
}

/// Latest market conditions for one asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketSnapshot {
    pub asset: String,
    pub price: Decimal,
    /// Coefficient of variation of buffered prices (0.05 = 5%)
    pub volatility: Decimal,
    pub volatility_bps: Decimal,
    pub liquidity_depth: Decimal,
    pub trading_volume: Decimal,
    pub yield_spread: Decimal,
    /// Composite risk score (0-100)
    pub risk_score: Decimal,
    pub bullish: bool,
    pub bearish: bool,
    pub high_volatility: bool,
    pub timestamp: DateTime<Utc>,
}

impl MarketSnapshot {
    /// Snapshot with no signal, used before the first refresh of an asset.
    pub fn neutral(asset: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            asset: asset.to_string(),
            price: Decimal::ZERO,
            volatility: Decimal::ZERO,
            volatility_bps: Decimal::ZERO,
            liquidity_depth: Decimal::ZERO,
            trading_volume: Decimal::ZERO,
            yield_spread: Decimal::ZERO,
            risk_score: Decimal::ZERO,
            bullish: false,
            bearish: false,
            high_volatility: false,
            timestamp,
        }
    }
}

/// Why the global emergency predicate tripped.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum EmergencyReason {
    RiskScore { score: Decimal, limit: Decimal },
    Volatility { volatility: Decimal, limit: Decimal },
    Liquidity { depth: Decimal, floor: Decimal },
}

/// The asset and condition that tripped the emergency predicate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmergencyTrigger {
    pub asset: String,
    pub reason: EmergencyReason,
}

/// Samples external feeds and keeps the latest snapshot per asset.
pub struct MarketConditionMonitor {
    config: MonitorConfig,
    buffers: HashMap<String, PriceBuffer>,
    snapshots: BTreeMap<String, MarketSnapshot>,
}

impl MarketConditionMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            buffers: HashMap::new(),
            snapshots: BTreeMap::new(),
        }
    }

    /// Ingest an observation and overwrite the asset's snapshot.
    pub fn refresh(
        &mut self,
        asset: &str,
        observation: &MarketObservation,
        now: DateTime<Utc>,
    ) -> &MarketSnapshot {
        let capacity = self.config.price_buffer_size;
        let buffer = self
            .buffers
            .entry(asset.to_string())
            .or_insert_with(|| PriceBuffer::new(capacity));
        buffer.push(observation.price);

        let volatility = buffer.volatility();
        let (bullish, bearish) = buffer.trend(self.config.trend_band);
        let risk_score = self.composite_risk(
            observation.external_risk,
            volatility,
            observation.liquidity_depth,
        );

        let snapshot = MarketSnapshot {
            asset: asset.to_string(),
            price: observation.price,
            volatility,
            volatility_bps: to_basis_points(volatility).round_dp(2),
            liquidity_depth: observation.liquidity_depth,
            trading_volume: observation.trading_volume,
            yield_spread: observation.yield_spread,
            risk_score,
            bullish,
            bearish,
            high_volatility: volatility >= self.config.high_volatility_threshold,
            timestamp: now,
        };

        let changed = self
            .snapshots
            .get(asset)
            .map(|prev| {
                prev.risk_score != snapshot.risk_score
                    || prev.bullish != snapshot.bullish
                    || prev.bearish != snapshot.bearish
                    || prev.high_volatility != snapshot.high_volatility
            })
            .unwrap_or(true);

        if changed {
            info!(
                target: "market_update",
                %asset,
                price = %snapshot.price,
                volatility_bps = %snapshot.volatility_bps,
                risk_score = %snapshot.risk_score,
                bullish = snapshot.bullish,
                bearish = snapshot.bearish,
                high_volatility = snapshot.high_volatility,
                "Market conditions changed"
            );
        } else {
            debug!(%asset, price = %snapshot.price, "Market snapshot refreshed");
        }

        self.snapshots.insert(asset.to_string(), snapshot);
        &self.snapshots[asset]
    }

    /// Latest snapshot for an asset.
    pub fn snapshot(&self, asset: &str) -> Option<&MarketSnapshot> {
        self.snapshots.get(asset)
    }

    /// All snapshots in asset order.
    pub fn snapshots(&self) -> impl Iterator<Item = &MarketSnapshot> {
        self.snapshots.values()
    }

    /// Number of buffered prices for an asset.
    pub fn sample_count(&self, asset: &str) -> usize {
        self.buffers.get(asset).map(PriceBuffer::len).unwrap_or(0)
    }

    /// First snapshot (in asset order) breaching an emergency threshold.
    pub fn detect_emergency(&self) -> Option<EmergencyTrigger> {
        self.snapshots.values().find_map(|s| {
            let reason = if s.risk_score >= self.config.emergency_risk_score {
                EmergencyReason::RiskScore {
                    score: s.risk_score,
                    limit: self.config.emergency_risk_score,
                }
            } else if s.volatility >= self.config.emergency_volatility {
                EmergencyReason::Volatility {
                    volatility: s.volatility,
                    limit: self.config.emergency_volatility,
                }
            } else if s.liquidity_depth < self.config.emergency_min_liquidity {
                EmergencyReason::Liquidity {
                    depth: s.liquidity_depth,
                    floor: self.config.emergency_min_liquidity,
                }
            } else {
                return None;
            };
            Some(EmergencyTrigger {
                asset: s.asset.clone(),
                reason,
            })
        })
    }

    fn composite_risk(
        &self,
        external: Decimal,
        volatility: Decimal,
        depth: Decimal,
    ) -> Decimal {
        let hundred = dec!(100);
        let volatility_score = volatility.saturating_mul(dec!(1000)).min(hundred);
        let liquidity_score = if depth >= self.config.min_liquidity_depth {
            Decimal::ZERO
        } else {
            (Decimal::ONE - safe_div(depth, self.config.min_liquidity_depth)) * hundred
        };

        let score = self.config.external_risk_weight * clamp(external, Decimal::ZERO, hundred)
            + self.config.volatility_risk_weight * volatility_score
            + self.config.liquidity_risk_weight * liquidity_score;
        clamp(score, Decimal::ZERO, hundred).round_dp(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(price: Decimal, external_risk: Decimal) -> MarketObservation {
        MarketObservation {
            price,
            trading_volume: dec!(1_000_000),
            liquidity_depth: dec!(5_000_000),
            yield_spread: dec!(0.02),
            external_risk,
        }
    }

    #[test]
    fn test_single_sample_has_zero_volatility() {
        let mut monitor = MarketConditionMonitor::new(MonitorConfig::default());
        let snapshot = monitor.refresh("ETH", &observation(dec!(2000), dec!(10)), Utc::now());

        assert_eq!(snapshot.volatility, Decimal::ZERO);
        assert!(!snapshot.bullish && !snapshot.bearish);
        // 0.5 * 10, no volatility or liquidity penalty
        assert_eq!(snapshot.risk_score, dec!(5));
    }

    #[test]
    fn test_volatility_is_std_over_mean() {
        let mut monitor = MarketConditionMonitor::new(MonitorConfig::default());
        let now = Utc::now();
        monitor.refresh("ETH", &observation(dec!(90), dec!(0)), now);
        let snapshot = monitor.refresh("ETH", &observation(dec!(110), dec!(0)), now);

        // mean 100, population std 10
        assert_eq!(snapshot.volatility, dec!(0.1));
        assert_eq!(snapshot.volatility_bps, dec!(1000));
        assert!(snapshot.high_volatility);
    }

    #[test]
    fn test_fixed_point_scaled_prices_do_not_overflow() {
        let mut monitor = MarketConditionMonitor::new(MonitorConfig::default());
        let now = Utc::now();
        let wad = dec!(1_000_000_000_000_000_000);
        monitor.refresh("ETH", &observation(wad, dec!(0)), now);
        let snapshot = monitor.refresh("ETH", &observation(wad * dec!(3), dec!(0)), now);

        // mean 2e18, relative deviations of +/- 0.5
        assert_eq!(snapshot.volatility, dec!(0.5));
        assert!(snapshot.bullish);
        assert_eq!(snapshot.risk_score, dec!(30));
    }

    #[test]
    fn test_buffer_overwrites_oldest() {
        let mut buffer = PriceBuffer::new(3);
        for price in [dec!(1), dec!(2), dec!(3), dec!(4)] {
            buffer.push(price);
        }
        assert_eq!(buffer.to_vec(), vec![dec!(2), dec!(3), dec!(4)]);
    }

    #[test]
    fn test_monitor_buffer_is_bounded() {
        let mut monitor = MarketConditionMonitor::new(MonitorConfig::default());
        let now = Utc::now();
        for _ in 0..30 {
            monitor.refresh("ETH", &observation(dec!(100), dec!(0)), now);
        }
        assert_eq!(monitor.sample_count("ETH"), 24);
    }

    #[test]
    fn test_trend_flags() {
        let mut monitor = MarketConditionMonitor::new(MonitorConfig::default());
        let now = Utc::now();
        monitor.refresh("ETH", &observation(dec!(100), dec!(0)), now);
        let snapshot = monitor.refresh("ETH", &observation(dec!(110), dec!(0)), now);
        // mean 105, latest 110 > 107.1
        assert!(snapshot.bullish);
        assert!(!snapshot.bearish);

        let snapshot = monitor.refresh("ETH", &observation(dec!(80), dec!(0)), now);
        assert!(snapshot.bearish);
    }

    #[test]
    fn test_thin_liquidity_raises_risk() {
        let mut monitor = MarketConditionMonitor::new(MonitorConfig::default());
        let mut thin = observation(dec!(100), dec!(0));
        thin.liquidity_depth = dec!(250_000);

        let snapshot = monitor.refresh("ETH", &thin, Utc::now());
        // 0.2 * (1 - 0.25) * 100
        assert_eq!(snapshot.risk_score, dec!(15));
    }

    #[test]
    fn test_detect_emergency_on_risk_score() {
        let mut monitor = MarketConditionMonitor::new(MonitorConfig {
            emergency_risk_score: dec!(40),
            ..MonitorConfig::default()
        });
        monitor.refresh("ETH", &observation(dec!(100), dec!(10)), Utc::now());
        assert!(monitor.detect_emergency().is_none());

        monitor.refresh("BTC", &observation(dec!(100), dec!(100)), Utc::now());
        let trigger = monitor.detect_emergency().unwrap();
        assert_eq!(trigger.asset, "BTC");
        assert!(matches!(trigger.reason, EmergencyReason::RiskScore { .. }));
    }

    #[test]
    fn test_detect_emergency_on_liquidity() {
        let mut monitor = MarketConditionMonitor::new(MonitorConfig::default());
        let mut drained = observation(dec!(100), dec!(0));
        drained.liquidity_depth = dec!(50_000);
        monitor.refresh("ETH", &drained, Utc::now());

        let trigger = monitor.detect_emergency().unwrap();
        assert!(matches!(trigger.reason, EmergencyReason::Liquidity { .. }));
    }
}
