//! Per-strategy execution history.

use std::collections::{BTreeMap, VecDeque};

use super::executor::ExecutionRecord;
use super::StrategyId;

/// Append-only record of executions, bounded per strategy.
///
/// Record ids are global and strictly increasing; the oldest entry of a
/// strategy is dropped once `retention` is exceeded.
pub struct ExecutionLedger {
    retention: usize,
    records: BTreeMap<StrategyId, VecDeque<ExecutionRecord>>,
    next_id: u64,
    total: u64,
}

impl ExecutionLedger {
    pub fn new(retention: usize) -> Self {
        Self {
            retention: retention.max(1),
            records: BTreeMap::new(),
            next_id: 1,
            total: 0,
        }
    }

    /// Records kept per strategy.
    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Id the next appended record will receive.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Store `record`, assigning it the next id. Returns the id.
    pub fn append(&mut self, mut record: ExecutionRecord) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.total += 1;
        record.id = id;

        let history = self.records.entry(record.strategy_id).or_default();
        if history.len() == self.retention {
            history.pop_front();
        }
        history.push_back(record);
        id
    }

    /// Retained records for a strategy, oldest first.
    pub fn history(&self, strategy_id: StrategyId) -> Vec<ExecutionRecord> {
        self.records
            .get(&strategy_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn latest(&self, strategy_id: StrategyId) -> Option<&ExecutionRecord> {
        self.records.get(&strategy_id).and_then(|h| h.back())
    }

    /// Number of records ever appended, including evicted ones.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Up to `limit` most recent records across all strategies, newest first.
    pub fn recent(&self, limit: usize) -> Vec<ExecutionRecord> {
        let mut all: Vec<&ExecutionRecord> = self.records.values().flatten().collect();
        all.sort_by(|a, b| b.id.cmp(&a.id));
        all.into_iter().take(limit).cloned().collect()
    }

    /// Every retained record, grouped by strategy, oldest first within a group.
    pub fn iter(&self) -> impl Iterator<Item = &ExecutionRecord> {
        self.records.values().flatten()
    }

    /// Re-insert a persisted record without changing its id.
    pub fn restore(&mut self, record: ExecutionRecord) {
        self.next_id = self.next_id.max(record.id + 1);
        self.total += 1;
        let history = self.records.entry(record.strategy_id).or_default();
        if history.len() == self.retention {
            history.pop_front();
        }
        history.push_back(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn record(strategy_id: StrategyId) -> ExecutionRecord {
        ExecutionRecord {
            id: 0,
            strategy_id,
            asset: "USDC".to_string(),
            transfers: Vec::new(),
            total_cost: Decimal::ZERO,
            predicted_gain: Decimal::ZERO,
            net_benefit: Decimal::ZERO,
            timestamp: Utc::now(),
            success: true,
            emergency: false,
            error: None,
        }
    }

    #[test]
    fn test_ids_are_sequential_across_strategies() {
        let mut ledger = ExecutionLedger::new(10);
        assert_eq!(ledger.append(record(1)), 1);
        assert_eq!(ledger.append(record(2)), 2);
        assert_eq!(ledger.append(record(1)), 3);
        assert_eq!(ledger.history(1).iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(ledger.latest(2).map(|r| r.id), Some(2));
    }

    #[test]
    fn test_retention_drops_oldest() {
        let mut ledger = ExecutionLedger::new(2);
        for _ in 0..3 {
            ledger.append(record(7));
        }
        let ids: Vec<u64> = ledger.history(7).iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(ledger.total(), 3);
    }

    #[test]
    fn test_recent_is_newest_first() {
        let mut ledger = ExecutionLedger::new(10);
        ledger.append(record(1));
        ledger.append(record(2));
        ledger.append(record(3));
        let ids: Vec<u64> = ledger.recent(2).iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 2]);
    }

    #[test]
    fn test_restore_keeps_ids_monotonic() {
        let mut ledger = ExecutionLedger::new(10);
        let mut old = record(1);
        old.id = 41;
        ledger.restore(old);
        assert_eq!(ledger.append(record(1)), 42);
    }
}
