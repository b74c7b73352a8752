use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use super::{BronzeSelection, WarehouseStore};
use crate::error::StoreError;
use crate::ledger::{RunLedger, StageKey, StageOutcome};
use crate::types::{
    BronzeRecord, FuelType, GoldPriceTrend, GoldStateAnalytics, RunLogEntry, RunStatus,
    SilverRecord,
};

#[derive(Debug, Default)]
struct Tables {
    bronze: BTreeMap<(String, NaiveDate), BronzeRecord>,
    silver: BTreeMap<(String, NaiveDate, FuelType), SilverRecord>,
    state_analytics: BTreeMap<(String, NaiveDate, FuelType), GoldStateAnalytics>,
    price_trends: BTreeMap<(String, FuelType, NaiveDate, NaiveDate), GoldPriceTrend>,
    run_log: BTreeMap<(String, String), RunLogEntry>,
}

/// In-process store with the same keyed upsert semantics as Postgres. Used
/// for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_writes: AtomicBool,
    fail_ledger: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent tier write fail, simulating a lost database.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent ledger write fail.
    pub fn set_fail_ledger(&self, fail: bool) {
        self.fail_ledger.store(fail, Ordering::SeqCst);
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }

    fn check_ledger(&self) -> Result<(), StoreError> {
        if self.fail_ledger.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("ledger writes disabled".to_string()));
        }
        Ok(())
    }

    pub fn bronze_rows(&self) -> Vec<BronzeRecord> {
        self.tables()
            .map(|t| t.bronze.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn silver_rows(&self) -> Vec<SilverRecord> {
        self.tables()
            .map(|t| t.silver.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn state_rows(&self) -> Vec<GoldStateAnalytics> {
        self.tables()
            .map(|t| t.state_analytics.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn trend_rows(&self) -> Vec<GoldPriceTrend> {
        self.tables()
            .map(|t| t.price_trends.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn ledger_entries(&self) -> Vec<RunLogEntry> {
        self.tables()
            .map(|t| t.run_log.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn ledger_entry(&self, run_id: &str, task_id: &str) -> Option<RunLogEntry> {
        self.tables()
            .ok()?
            .run_log
            .get(&(run_id.to_string(), task_id.to_string()))
            .cloned()
    }
}

#[async_trait]
impl WarehouseStore for MemoryStore {
    async fn upsert_bronze(&self, records: &[BronzeRecord]) -> Result<usize, StoreError> {
        self.check_writable()?;
        let mut tables = self.tables()?;
        for record in records {
            tables.bronze.insert(record.key(), record.clone());
        }
        Ok(records.len())
    }

    async fn load_bronze(&self, selection: BronzeSelection) -> Result<Vec<BronzeRecord>, StoreError> {
        let tables = self.tables()?;
        Ok(tables
            .bronze
            .values()
            .filter(|record| selection.matches(record))
            .cloned()
            .collect())
    }

    async fn upsert_silver(&self, records: &[SilverRecord]) -> Result<usize, StoreError> {
        self.check_writable()?;
        let mut tables = self.tables()?;
        for record in records {
            tables.silver.insert(record.key(), record.clone());
        }
        Ok(records.len())
    }

    async fn load_silver(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<SilverRecord>, StoreError> {
        let tables = self.tables()?;
        Ok(tables
            .silver
            .values()
            .filter(|record| record.applicable_on >= start && record.applicable_on <= end)
            .cloned()
            .collect())
    }

    async fn upsert_state_analytics(&self, rows: &[GoldStateAnalytics]) -> Result<usize, StoreError> {
        self.check_writable()?;
        let mut tables = self.tables()?;
        for row in rows {
            tables.state_analytics.insert(row.key(), row.clone());
        }
        Ok(rows.len())
    }

    async fn upsert_price_trends(&self, rows: &[GoldPriceTrend]) -> Result<usize, StoreError> {
        self.check_writable()?;
        let mut tables = self.tables()?;
        for row in rows {
            tables.price_trends.insert(row.key(), row.clone());
        }
        Ok(rows.len())
    }

    async fn load_state_analytics(
        &self,
        report_date: Option<NaiveDate>,
    ) -> Result<Vec<GoldStateAnalytics>, StoreError> {
        let tables = self.tables()?;
        let target = match report_date {
            Some(date) => Some(date),
            None => tables.state_analytics.values().map(|row| row.report_date).max(),
        };
        let Some(target) = target else {
            return Ok(Vec::new());
        };
        Ok(tables
            .state_analytics
            .values()
            .filter(|row| row.report_date == target)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RunLedger for MemoryStore {
    async fn begin(&self, key: &StageKey, started_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.check_ledger()?;
        let mut tables = self.tables()?;
        let map_key = (key.run_id.clone(), key.task_id.clone());
        let attempt = tables
            .run_log
            .get(&map_key)
            .map(|entry| entry.attempt + 1)
            .unwrap_or(1);
        tables.run_log.insert(
            map_key,
            RunLogEntry {
                run_id: key.run_id.clone(),
                workflow_id: key.workflow_id.clone(),
                task_id: key.task_id.clone(),
                layer: key.layer,
                records_processed: 0,
                records_failed: 0,
                start_time: started_at,
                end_time: None,
                status: RunStatus::Running,
                error_message: None,
                attempt,
            },
        );
        Ok(())
    }

    async fn finish(
        &self,
        key: &StageKey,
        started_at: DateTime<Utc>,
        outcome: &StageOutcome,
    ) -> Result<(), StoreError> {
        self.check_ledger()?;
        let mut tables = self.tables()?;
        let entry = tables
            .run_log
            .entry((key.run_id.clone(), key.task_id.clone()))
            .or_insert_with(|| RunLogEntry {
                run_id: key.run_id.clone(),
                workflow_id: key.workflow_id.clone(),
                task_id: key.task_id.clone(),
                layer: key.layer,
                records_processed: 0,
                records_failed: 0,
                start_time: started_at,
                end_time: None,
                status: RunStatus::Running,
                error_message: None,
                attempt: 1,
            });
        entry.records_processed = outcome.records_processed as i64;
        entry.records_failed = outcome.records_failed as i64;
        entry.end_time = Some(outcome.finished_at);
        entry.status = outcome.status;
        entry.error_message = outcome.error_message.clone();
        Ok(())
    }
}
