//! Configuration management for the yield rebalancer.
//!
//! Loads settings from environment variables and config files.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Limits applied when strategies are created or edited
    #[serde(default)]
    pub strategy: StrategyLimits,
    /// Market condition sampling and emergency predicate
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Allocation scoring parameters
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    /// Rebalance gating and emergency routing
    #[serde(default)]
    pub gate: GateConfig,
    /// Transfer planning and execution history
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Automation loop parameters
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyLimits {
    /// Maximum number of venues a single strategy may target
    #[serde(default = "default_max_venues")]
    pub max_venues: usize,
    /// Highest slippage tolerance a strategy may declare (0.0-1.0)
    #[serde(default = "default_max_slippage_ceiling")]
    pub max_slippage_ceiling: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Number of price samples kept per asset for volatility
    #[serde(default = "default_price_buffer_size")]
    pub price_buffer_size: usize,
    /// Volatility at or above which an asset is flagged high-volatility (0.05 = 5%)
    #[serde(default = "default_high_volatility_threshold")]
    pub high_volatility_threshold: Decimal,
    /// Distance from the buffered mean that marks a bullish/bearish trend
    #[serde(default = "default_trend_band")]
    pub trend_band: Decimal,
    /// Liquidity depth below which the liquidity risk component starts rising
    #[serde(default = "default_min_liquidity_depth")]
    pub min_liquidity_depth: Decimal,
    /// Weight of the external risk input in the composite score
    #[serde(default = "default_external_risk_weight")]
    pub external_risk_weight: Decimal,
    /// Weight of the volatility component in the composite score
    #[serde(default = "default_volatility_risk_weight")]
    pub volatility_risk_weight: Decimal,
    /// Weight of the liquidity shortfall component in the composite score
    #[serde(default = "default_liquidity_risk_weight")]
    pub liquidity_risk_weight: Decimal,

    // Global emergency predicate
    /// Composite risk score that trips emergency mode (0-100)
    #[serde(default = "default_emergency_risk_score")]
    pub emergency_risk_score: Decimal,
    /// Volatility that trips emergency mode
    #[serde(default = "default_emergency_volatility")]
    pub emergency_volatility: Decimal,
    /// Liquidity depth below which emergency mode trips
    #[serde(default = "default_emergency_min_liquidity")]
    pub emergency_min_liquidity: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Maximum fraction RiskMinimization may place in one venue before clamping
    #[serde(default = "default_max_concentration")]
    pub max_concentration: Decimal,
    /// Lower bound on venue risk used when inverting risk scores
    #[serde(default = "default_risk_floor")]
    pub risk_floor: Decimal,
    /// DynamicHedging multiplier for growth venues in bullish markets
    #[serde(default = "default_growth_boost")]
    pub growth_boost: Decimal,
    /// DynamicHedging multiplier for stable venues in bearish markets
    #[serde(default = "default_stable_boost")]
    pub stable_boost: Decimal,
    /// DynamicHedging multiplier for high-risk venues under high volatility
    #[serde(default = "default_high_risk_cut")]
    pub high_risk_cut: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Risk score at or above which a strategy is routed to the safe allocation
    #[serde(default = "default_emergency_threshold")]
    pub emergency_threshold: Decimal,
    /// Share of capital the safe allocation places in stable venues
    #[serde(default = "default_safe_stable_weight")]
    pub safe_stable_weight: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Transfers smaller than this (in asset units) are skipped
    #[serde(default = "default_min_transfer_size")]
    pub min_transfer_size: Decimal,
    /// Execution cost charged per planned transfer
    #[serde(default = "default_transfer_cost")]
    pub transfer_cost: Decimal,
    /// Execution records retained per strategy
    #[serde(default = "default_history_retention")]
    pub history_retention: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of tasks executed in one tick
    #[serde(default = "default_max_tasks_per_tick")]
    pub max_tasks_per_tick: usize,
    /// Seconds between ticks when driven by the binary
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Task execution entries retained for operators
    #[serde(default = "default_task_history_retention")]
    pub task_history_retention: usize,
}

// Default value functions
fn default_max_venues() -> usize {
    10
}

fn default_max_slippage_ceiling() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

fn default_price_buffer_size() -> usize {
    24
}

fn default_high_volatility_threshold() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

fn default_trend_band() -> Decimal {
    Decimal::new(2, 2) // 0.02
}

fn default_min_liquidity_depth() -> Decimal {
    Decimal::new(1_000_000, 0)
}

fn default_external_risk_weight() -> Decimal {
    Decimal::new(5, 1) // 0.5
}

fn default_volatility_risk_weight() -> Decimal {
    Decimal::new(3, 1) // 0.3
}

fn default_liquidity_risk_weight() -> Decimal {
    Decimal::new(2, 1) // 0.2
}

fn default_emergency_risk_score() -> Decimal {
    Decimal::new(90, 0)
}

fn default_emergency_volatility() -> Decimal {
    Decimal::new(15, 2) // 0.15
}

fn default_emergency_min_liquidity() -> Decimal {
    Decimal::new(100_000, 0)
}

fn default_max_concentration() -> Decimal {
    Decimal::new(5, 1) // 0.5
}

fn default_risk_floor() -> Decimal {
    Decimal::ONE
}

fn default_growth_boost() -> Decimal {
    Decimal::new(12, 1) // +20%
}

fn default_stable_boost() -> Decimal {
    Decimal::new(11, 1) // +10%
}

fn default_high_risk_cut() -> Decimal {
    Decimal::new(7, 1) // x0.7
}

fn default_emergency_threshold() -> Decimal {
    Decimal::new(80, 0)
}

fn default_safe_stable_weight() -> Decimal {
    Decimal::new(8, 1) // 0.8
}

fn default_min_transfer_size() -> Decimal {
    Decimal::new(100, 0)
}

fn default_transfer_cost() -> Decimal {
    Decimal::new(2, 0)
}

fn default_history_retention() -> usize {
    100
}

fn default_max_tasks_per_tick() -> usize {
    3
}

fn default_tick_interval_secs() -> u64 {
    12 // roughly one block
}

fn default_task_history_retention() -> usize {
    256
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("YRB"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.strategy.max_venues > 0, "max_venues must be positive");

        anyhow::ensure!(
            self.strategy.max_slippage_ceiling > Decimal::ZERO
                && self.strategy.max_slippage_ceiling <= Decimal::ONE,
            "max_slippage_ceiling must be between 0 and 1"
        );

        anyhow::ensure!(
            self.monitor.price_buffer_size >= 2,
            "price_buffer_size must hold at least 2 samples"
        );

        let weights = self.monitor.external_risk_weight
            + self.monitor.volatility_risk_weight
            + self.monitor.liquidity_risk_weight;
        anyhow::ensure!(weights == Decimal::ONE, "risk weights must sum to 1");

        anyhow::ensure!(
            self.optimizer.max_concentration > Decimal::ZERO
                && self.optimizer.max_concentration <= Decimal::ONE,
            "max_concentration must be between 0 and 1"
        );

        anyhow::ensure!(
            self.optimizer.risk_floor > Decimal::ZERO,
            "risk_floor must be positive"
        );

        anyhow::ensure!(
            self.gate.safe_stable_weight >= Decimal::ZERO
                && self.gate.safe_stable_weight <= Decimal::ONE,
            "safe_stable_weight must be between 0 and 1"
        );

        anyhow::ensure!(
            self.executor.history_retention > 0,
            "history_retention must be positive"
        );

        anyhow::ensure!(
            self.scheduler.max_tasks_per_tick > 0,
            "max_tasks_per_tick must be positive"
        );

        Ok(())
    }
}

impl Default for StrategyLimits {
    fn default() -> Self {
        Self {
            max_venues: default_max_venues(),
            max_slippage_ceiling: default_max_slippage_ceiling(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            price_buffer_size: default_price_buffer_size(),
            high_volatility_threshold: default_high_volatility_threshold(),
            trend_band: default_trend_band(),
            min_liquidity_depth: default_min_liquidity_depth(),
            external_risk_weight: default_external_risk_weight(),
            volatility_risk_weight: default_volatility_risk_weight(),
            liquidity_risk_weight: default_liquidity_risk_weight(),
            emergency_risk_score: default_emergency_risk_score(),
            emergency_volatility: default_emergency_volatility(),
            emergency_min_liquidity: default_emergency_min_liquidity(),
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_concentration: default_max_concentration(),
            risk_floor: default_risk_floor(),
            growth_boost: default_growth_boost(),
            stable_boost: default_stable_boost(),
            high_risk_cut: default_high_risk_cut(),
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            emergency_threshold: default_emergency_threshold(),
            safe_stable_weight: default_safe_stable_weight(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            min_transfer_size: default_min_transfer_size(),
            transfer_cost: default_transfer_cost(),
            history_retention: default_history_retention(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_tasks_per_tick: default_max_tasks_per_tick(),
            tick_interval_secs: default_tick_interval_secs(),
            task_history_retention: default_task_history_retention(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_risk_weights_must_sum_to_one() {
        let mut config = Config::default();
        config.monitor.liquidity_risk_weight = dec!(0.3);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_tick_cap_rejected() {
        let mut config = Config::default();
        config.scheduler.max_tasks_per_tick = 0;
        assert!(config.validate().is_err());
    }
}
