//! SQLite persistence for rebalancer state.
//!
//! Persists state to survive restarts:
//! - Strategies and automation tasks (as JSON documents)
//! - Execution records
//! - Performance metrics and emergency mode

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::automation::{AutomationTask, PerformanceMetrics, SchedulerContext};
use crate::market::EmergencyTrigger;
use crate::strategy::{ExecutionRecord, Strategy};

/// Scheduler-wide state saved alongside the metrics.
#[derive(Debug, Clone)]
pub struct PersistedStatus {
    pub metrics: PerformanceMetrics,
    pub emergency: Option<String>,
    pub automation_enabled: bool,
    pub last_saved: DateTime<Utc>,
}

/// SQLite-based persistence manager.
pub struct PersistenceManager {
    conn: Connection,
}

impl PersistenceManager {
    /// Open (or create) the database and initialize its schema.
    pub fn new<P: AsRef<std::path::Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        let manager = Self { conn };
        manager.init_schema()?;

        info!("Persistence manager initialized at {:?}", db_path.as_ref());
        Ok(manager)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS strategies (
                id INTEGER PRIMARY KEY,
                asset TEXT NOT NULL,
                active INTEGER NOT NULL,
                body TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY,
                kind TEXT NOT NULL,
                active INTEGER NOT NULL,
                body TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS executions (
                id INTEGER PRIMARY KEY,
                strategy_id INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                success INTEGER NOT NULL,
                body TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_executions_strategy ON executions(strategy_id);
            CREATE INDEX IF NOT EXISTS idx_executions_timestamp ON executions(timestamp);

            -- Scheduler status (singleton row)
            CREATE TABLE IF NOT EXISTS scheduler_status (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                metrics TEXT NOT NULL,
                emergency TEXT,
                automation_enabled INTEGER NOT NULL,
                last_saved TEXT NOT NULL
            );
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    pub fn save_strategies<'a>(&self, strategies: impl IntoIterator<Item = &'a Strategy>) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for strategy in strategies {
            tx.execute(
                r#"
                INSERT INTO strategies (id, asset, active, body) VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(id) DO UPDATE SET asset = ?2, active = ?3, body = ?4
                "#,
                params![
                    strategy.id,
                    strategy.asset,
                    strategy.active,
                    serde_json::to_string(strategy)?,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load_strategies(&self) -> Result<Vec<Strategy>> {
        self.load_documents("SELECT body FROM strategies ORDER BY id")
    }

    pub fn save_tasks<'a>(&self, tasks: impl IntoIterator<Item = &'a AutomationTask>) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for task in tasks {
            tx.execute(
                r#"
                INSERT INTO tasks (id, kind, active, body) VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(id) DO UPDATE SET kind = ?2, active = ?3, body = ?4
                "#,
                params![
                    task.id,
                    task.kind.to_string(),
                    task.active,
                    serde_json::to_string(task)?,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load_tasks(&self) -> Result<Vec<AutomationTask>> {
        self.load_documents("SELECT body FROM tasks ORDER BY id")
    }

    /// Store execution records. Records already stored are left untouched.
    pub fn record_executions<'a>(
        &self,
        records: impl IntoIterator<Item = &'a ExecutionRecord>,
    ) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut inserted = 0;
        for record in records {
            inserted += tx.execute(
                r#"
                INSERT OR IGNORE INTO executions (id, strategy_id, timestamp, success, body)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    record.id,
                    record.strategy_id,
                    record.timestamp.to_rfc3339(),
                    record.success,
                    serde_json::to_string(record)?,
                ],
            )?;
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Keep only the newest `retention` records of each strategy.
    /// Returns the number of rows removed.
    pub fn prune_executions(&self, retention: usize) -> Result<usize> {
        let removed = self.conn.execute(
            r#"
            DELETE FROM executions
            WHERE (
                SELECT COUNT(*) FROM executions AS newer
                WHERE newer.strategy_id = executions.strategy_id
                  AND newer.id > executions.id
            ) >= ?1
            "#,
            [i64::try_from(retention).unwrap_or(i64::MAX)],
        )?;
        if removed > 0 {
            debug!(removed, retention, "Pruned execution history");
        }
        Ok(removed)
    }

    /// Most recent execution records, newest first.
    pub fn recent_executions(&self, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT body FROM executions ORDER BY id DESC LIMIT ?1")?;
        let bodies: Vec<String> = stmt
            .query_map([i64::try_from(limit).unwrap_or(i64::MAX)], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        parse_documents(bodies)
    }

    pub fn save_status(
        &self,
        metrics: &PerformanceMetrics,
        emergency: Option<&EmergencyTrigger>,
        automation_enabled: bool,
    ) -> Result<()> {
        let emergency = emergency.map(serde_json::to_string).transpose()?;
        self.conn.execute(
            r#"
            INSERT INTO scheduler_status (id, metrics, emergency, automation_enabled, last_saved)
            VALUES (1, ?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                metrics = ?1,
                emergency = ?2,
                automation_enabled = ?3,
                last_saved = ?4
            "#,
            params![
                serde_json::to_string(metrics)?,
                emergency,
                automation_enabled,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn load_status(&self) -> Result<Option<PersistedStatus>> {
        let row: Option<(String, Option<String>, bool, String)> = self
            .conn
            .query_row(
                "SELECT metrics, emergency, automation_enabled, last_saved FROM scheduler_status WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        let Some((metrics, emergency, automation_enabled, last_saved)) = row else {
            return Ok(None);
        };

        Ok(Some(PersistedStatus {
            metrics: serde_json::from_str(&metrics).context("Corrupt metrics row")?,
            emergency,
            automation_enabled,
            last_saved: DateTime::parse_from_rfc3339(&last_saved)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }))
    }

    /// Save strategies, tasks, retained execution records and status in one pass.
    pub fn save_context(&self, ctx: &SchedulerContext) -> Result<()> {
        self.save_strategies(ctx.registry().list())?;
        self.save_tasks(ctx.tasks())?;
        let ledger = ctx.executor().ledger();
        let inserted = self.record_executions(ledger.iter())?;
        self.prune_executions(ledger.retention())?;
        self.save_status(ctx.metrics(), ctx.emergency(), ctx.automation_enabled())?;

        debug!(
            strategies = ctx.registry().len(),
            new_executions = inserted,
            "State saved to database"
        );
        Ok(())
    }

    /// Load persisted strategies, tasks, execution history and metrics into `ctx`.
    ///
    /// Emergency mode is not restored; it is recomputed from live market data.
    pub fn restore_context(&self, ctx: &mut SchedulerContext) -> Result<bool> {
        let strategies = self.load_strategies()?;
        let tasks = self.load_tasks()?;
        if strategies.is_empty() && tasks.is_empty() {
            return Ok(false);
        }

        for strategy in strategies {
            ctx.registry_mut().restore(strategy);
        }
        for task in tasks {
            ctx.restore_task(task);
        }

        let records: Vec<ExecutionRecord> =
            self.load_documents("SELECT body FROM executions ORDER BY id")?;
        for record in records {
            ctx.executor_mut().ledger_mut().restore(record);
        }

        if let Some(status) = self.load_status()? {
            if status.emergency.is_some() {
                warn!("Emergency mode was on at last save");
            }
            ctx.restore_metrics(status.metrics);
            ctx.set_automation_enabled(status.automation_enabled);
        }

        info!(
            strategies = ctx.registry().len(),
            tasks = ctx.tasks().count(),
            "Loaded state from database"
        );
        Ok(true)
    }

    pub fn has_state(&self) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM strategies", [], |row| row.get(0))?;
        Ok(count > 0)
    }

    /// Clear all data (for testing or reset).
    pub fn clear_all(&self) -> Result<()> {
        warn!("Clearing all persistence data");
        self.conn.execute_batch(
            r#"
            DELETE FROM strategies;
            DELETE FROM tasks;
            DELETE FROM executions;
            DELETE FROM scheduler_status;
            "#,
        )?;
        Ok(())
    }

    fn load_documents<T: serde::de::DeserializeOwned>(&self, sql: &str) -> Result<Vec<T>> {
        let mut stmt = self.conn.prepare(sql)?;
        let bodies: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        parse_documents(bodies)
    }
}

fn parse_documents<T: serde::de::DeserializeOwned>(bodies: Vec<String>) -> Result<Vec<T>> {
    bodies
        .iter()
        .map(|body| serde_json::from_str(body).context("Corrupt JSON document in database"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::{TaskDefinition, TaskKind, TriggerKind};
    use crate::config::Config;
    use crate::strategy::{sample_definition, TransferLeg};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn record(id: u64, strategy_id: u64) -> ExecutionRecord {
        ExecutionRecord {
            id,
            strategy_id,
            asset: "USDC".to_string(),
            transfers: vec![TransferLeg {
                from_venue: "curve".to_string(),
                to_venue: "aave".to_string(),
                amount: dec!(1000),
                slippage: dec!(0.001),
            }],
            total_cost: dec!(2),
            predicted_gain: dec!(5),
            net_benefit: dec!(3),
            timestamp: Utc::now(),
            success: true,
            emergency: false,
            error: None,
        }
    }

    #[test]
    fn test_context_round_trip() {
        let manager = PersistenceManager::new(":memory:").unwrap();
        let config = Config::default();

        let mut ctx = SchedulerContext::new(&config);
        let strategy_id = ctx.registry_mut().create(sample_definition()).unwrap();
        ctx.add_task(TaskDefinition {
            kind: TaskKind::Rebalance,
            trigger: TriggerKind::TimeBased,
            interval_secs: 3600,
            threshold: Decimal::ZERO,
            priority: 7,
            resource_budget: Decimal::ZERO,
            payload: serde_json::Value::Null,
        })
        .unwrap();
        ctx.executor_mut().ledger_mut().append(record(0, strategy_id));
        manager.save_context(&ctx).unwrap();

        let mut restored = SchedulerContext::new(&config);
        assert!(manager.restore_context(&mut restored).unwrap());

        assert_eq!(restored.registry().get(strategy_id), ctx.registry().get(strategy_id));
        assert_eq!(restored.task(1).unwrap().priority, 7);
        let history = restored.executor().ledger().history(strategy_id);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].transfers[0].amount, dec!(1000));
        // Ids keep counting from the restored state
        assert_eq!(restored.registry_mut().create(sample_definition()).unwrap(), strategy_id + 1);
        assert_eq!(restored.executor().ledger().next_id(), 2);
    }

    #[test]
    fn test_executions_are_inserted_once() {
        let manager = PersistenceManager::new(":memory:").unwrap();
        let records = vec![record(1, 1), record(2, 1)];

        assert_eq!(manager.record_executions(records.iter()).unwrap(), 2);
        assert_eq!(manager.record_executions(records.iter()).unwrap(), 0);

        let recent = manager.recent_executions(1).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, 2);
    }

    #[test]
    fn test_saved_history_honors_retention() {
        let manager = PersistenceManager::new(":memory:").unwrap();
        let mut config = Config::default();
        config.executor.history_retention = 2;
        let mut ctx = SchedulerContext::new(&config);

        for _ in 0..10 {
            ctx.executor_mut().ledger_mut().append(record(0, 1));
            ctx.executor_mut().ledger_mut().append(record(0, 2));
            manager.save_context(&ctx).unwrap();
        }

        let stored = manager.recent_executions(usize::MAX).unwrap();
        let ids: Vec<u64> = stored.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![20, 19, 18, 17]);
        assert_eq!(manager.prune_executions(1).unwrap(), 2);
    }

    #[test]
    fn test_status_round_trip() {
        let manager = PersistenceManager::new(":memory:").unwrap();
        assert!(manager.load_status().unwrap().is_none());

        let mut metrics = PerformanceMetrics::default();
        metrics.record_execution(true, dec!(4));
        metrics.record_tick(true);
        manager.save_status(&metrics, None, false).unwrap();

        let status = manager.load_status().unwrap().unwrap();
        assert_eq!(status.metrics, metrics);
        assert!(!status.automation_enabled);
        assert!(status.emergency.is_none());
    }

    #[test]
    fn test_empty_database_restores_nothing() {
        let manager = PersistenceManager::new(":memory:").unwrap();
        let mut ctx = SchedulerContext::new(&Config::default());
        assert!(!manager.restore_context(&mut ctx).unwrap());
        assert!(!manager.has_state().unwrap());
    }
}
