//! Scheduler performance counters.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::utils::decimal::safe_div;

/// Process-wide counters, accumulated for the scheduler's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub total_cost: Decimal,
    pub average_cost: Decimal,
    pub ticks: u64,
    /// Ticks that finished without a task failure
    pub healthy_ticks: u64,
}

impl PerformanceMetrics {
    pub fn record_execution(&mut self, success: bool, cost: Decimal) {
        self.total_executions += 1;
        if success {
            self.successful_executions += 1;
        } else {
            self.failed_executions += 1;
        }
        self.total_cost += cost;
        self.average_cost = safe_div(self.total_cost, Decimal::from(self.total_executions));
    }

    pub fn record_tick(&mut self, healthy: bool) {
        self.ticks += 1;
        if healthy {
            self.healthy_ticks += 1;
        }
    }

    /// Healthy ticks over all ticks; 1 before the first tick.
    pub fn uptime_ratio(&self) -> Decimal {
        if self.ticks == 0 {
            return Decimal::ONE;
        }
        safe_div(Decimal::from(self.healthy_ticks), Decimal::from(self.ticks))
    }

    pub fn success_rate(&self) -> Decimal {
        if self.total_executions == 0 {
            return Decimal::ZERO;
        }
        safe_div(
            Decimal::from(self.successful_executions),
            Decimal::from(self.total_executions),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_rolling_average_cost() {
        let mut metrics = PerformanceMetrics::default();
        metrics.record_execution(true, dec!(4));
        metrics.record_execution(false, dec!(2));
        metrics.record_execution(true, Decimal::ZERO);

        assert_eq!(metrics.total_executions, 3);
        assert_eq!(metrics.failed_executions, 1);
        assert_eq!(metrics.average_cost, dec!(2));
    }

    #[test]
    fn test_uptime_ratio() {
        let mut metrics = PerformanceMetrics::default();
        assert_eq!(metrics.uptime_ratio(), Decimal::ONE);
        metrics.record_tick(true);
        metrics.record_tick(true);
        metrics.record_tick(true);
        metrics.record_tick(false);
        assert_eq!(metrics.uptime_ratio(), dec!(0.75));
    }
}
