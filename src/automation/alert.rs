//! Structured risk alerts emitted by the scheduler.
//!
//! Alerts are serialized to JSON and logged under the `risk_alert` target so
//! downstream tooling can parse them out of the log stream.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{error, info, warn};

use super::{TaskId, TaskKind};
use crate::market::{EmergencyTrigger, EmergencyReason};

/// Severity levels for alerts.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// What an alert is about.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertKind {
    EmergencyActivated { reason: EmergencyReason },
    EmergencyCleared,
    ElevatedRisk { risk_score: Decimal, limit: Decimal },
    TaskFailed { task_id: TaskId, kind: TaskKind },
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskAlert {
    pub alert_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub asset: Option<String>,
    pub message: String,
    pub metrics: BTreeMap<String, Decimal>,
}

impl RiskAlert {
    pub fn new(
        kind: AlertKind,
        severity: AlertSeverity,
        asset: Option<String>,
        message: String,
    ) -> Self {
        let timestamp = Utc::now();
        let alert_id = format!(
            "alert-{}-{}",
            timestamp.timestamp(),
            timestamp.timestamp_subsec_nanos()
        );
        Self {
            alert_id,
            timestamp,
            kind,
            severity,
            asset,
            message,
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_metric(mut self, key: &str, value: Decimal) -> Self {
        self.metrics.insert(key.to_string(), value);
        self
    }

    pub fn emergency_activated(trigger: &EmergencyTrigger) -> Self {
        let message = match &trigger.reason {
            EmergencyReason::RiskScore { score, limit } => {
                format!("risk score {} reached emergency level {}", score, limit)
            }
            EmergencyReason::Volatility { volatility, limit } => {
                format!("volatility {} reached emergency level {}", volatility, limit)
            }
            EmergencyReason::Liquidity { depth, floor } => {
                format!("liquidity depth {} below emergency floor {}", depth, floor)
            }
        };
        Self::new(
            AlertKind::EmergencyActivated {
                reason: trigger.reason.clone(),
            },
            AlertSeverity::Critical,
            Some(trigger.asset.clone()),
            message,
        )
    }

    pub fn emergency_cleared() -> Self {
        Self::new(
            AlertKind::EmergencyCleared,
            AlertSeverity::Info,
            None,
            "emergency mode cleared by operator".to_string(),
        )
    }

    pub fn elevated_risk(asset: &str, risk_score: Decimal, limit: Decimal) -> Self {
        Self::new(
            AlertKind::ElevatedRisk { risk_score, limit },
            AlertSeverity::Warning,
            Some(asset.to_string()),
            format!("{} risk score {} at or above {}", asset, risk_score, limit),
        )
    }

    pub fn task_failed(task_id: TaskId, kind: TaskKind, error: &str) -> Self {
        Self::new(
            AlertKind::TaskFailed { task_id, kind },
            AlertSeverity::Warning,
            None,
            format!("task {} ({}) failed: {}", task_id, kind, error),
        )
    }

    /// Emit as structured log for workflow parsing.
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();

        match self.severity {
            AlertSeverity::Info => info!(target: "risk_alert", "RISK_ALERT: {}", json),
            AlertSeverity::Warning => warn!(target: "risk_alert", "RISK_ALERT: {}", json),
            AlertSeverity::Critical => error!(target: "risk_alert", "RISK_ALERT: {}", json),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_alert_serializes_with_tagged_kind() {
        let trigger = EmergencyTrigger {
            asset: "USDC".to_string(),
            reason: EmergencyReason::Liquidity {
                depth: dec!(50000),
                floor: dec!(100000),
            },
        };
        let alert = RiskAlert::emergency_activated(&trigger).with_metric("depth", dec!(50000));
        let json = serde_json::to_value(&alert).unwrap();

        assert_eq!(json["kind"]["type"], "emergency_activated");
        assert_eq!(json["kind"]["reason"]["type"], "Liquidity");
        assert_eq!(json["severity"], "Critical");
        assert_eq!(json["asset"], "USDC");
    }
}
