use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;

use super::{BronzeSelection, WarehouseStore};
use crate::db::DbPool;
use crate::error::StoreError;
use crate::ledger::{RunLedger, StageKey, StageOutcome};
use crate::types::{
    BronzeRecord, FuelType, GoldPriceTrend, GoldStateAnalytics, Layer, RunLogEntry, RunStatus,
    SilverRecord,
};

#[derive(Clone)]
pub struct PostgresStore {
    pool: DbPool,
}

impl PostgresStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn fetch_run_log(&self, run_id: &str) -> Result<Vec<RunLogEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, dag_id, task_id, layer, records_processed, records_failed,
                   start_time, end_time, status, error_message, attempt
            FROM etl_run_log
            WHERE run_id = $1
            ORDER BY start_time
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(run_log_from_row).collect()
    }
}

fn fuel_from_row(row: &PgRow) -> Result<FuelType, StoreError> {
    let tag: String = row.try_get("fuel_type")?;
    FuelType::from_tag(&tag).ok_or_else(|| StoreError::Corrupt(format!("unknown fuel type '{tag}'")))
}

fn bronze_from_row(row: &PgRow) -> Result<BronzeRecord, StoreError> {
    Ok(BronzeRecord {
        city_id: row.try_get("city_id")?,
        city_name: row.try_get("city_name")?,
        state_id: row.try_get("state_id")?,
        state_name: row.try_get("state_name")?,
        country_id: row.try_get("country_id")?,
        applicable_on: row.try_get("applicable_on")?,
        raw_data: row.try_get("raw_data")?,
        ingestion_timestamp: row.try_get("ingestion_timestamp")?,
    })
}

fn silver_from_row(row: &PgRow) -> Result<SilverRecord, StoreError> {
    Ok(SilverRecord {
        city_id: row.try_get("city_id")?,
        city_name: row.try_get("city_name")?,
        state_id: row.try_get("state_id")?,
        state_name: row.try_get("state_name")?,
        applicable_on: row.try_get("applicable_on")?,
        fuel_type: fuel_from_row(row)?,
        retail_price: row.try_get("retail_price")?,
        price_change: row.try_get("price_change")?,
        change_interval: row.try_get("change_interval")?,
        retail_unit: row.try_get("retail_unit")?,
        currency: row.try_get("currency")?,
        processed_timestamp: row.try_get("processed_timestamp")?,
    })
}

fn state_from_row(row: &PgRow) -> Result<GoldStateAnalytics, StoreError> {
    Ok(GoldStateAnalytics {
        state_id: row.try_get("state_id")?,
        state_name: row.try_get("state_name")?,
        report_date: row.try_get("report_date")?,
        fuel_type: fuel_from_row(row)?,
        avg_price: row.try_get("avg_price")?,
        min_price: row.try_get("min_price")?,
        max_price: row.try_get("max_price")?,
        price_std_dev: row.try_get("price_std_dev")?,
        city_count: row.try_get("city_count")?,
        computed_timestamp: row.try_get("computed_timestamp")?,
    })
}

fn run_log_from_row(row: &PgRow) -> Result<RunLogEntry, StoreError> {
    let layer: String = row.try_get("layer")?;
    let status: String = row.try_get("status")?;
    Ok(RunLogEntry {
        run_id: row.try_get("run_id")?,
        workflow_id: row.try_get("dag_id")?,
        task_id: row.try_get("task_id")?,
        layer: Layer::from_str(&layer)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown layer '{layer}'")))?,
        records_processed: row.try_get::<i32, _>("records_processed")? as i64,
        records_failed: row.try_get::<i32, _>("records_failed")? as i64,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        status: RunStatus::from_str(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown status '{status}'")))?,
        error_message: row.try_get("error_message")?,
        attempt: row.try_get("attempt")?,
    })
}

#[async_trait]
impl WarehouseStore for PostgresStore {
    async fn upsert_bronze(&self, records: &[BronzeRecord]) -> Result<usize, StoreError> {
        let mut db_tx = self.pool.begin().await?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO bronze_fuel_prices
                    (city_id, city_name, state_id, state_name, country_id,
                     applicable_on, raw_data, ingestion_timestamp)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (city_id, applicable_on) DO UPDATE SET
                    city_name = EXCLUDED.city_name,
                    state_id = EXCLUDED.state_id,
                    state_name = EXCLUDED.state_name,
                    country_id = EXCLUDED.country_id,
                    raw_data = EXCLUDED.raw_data,
                    ingestion_timestamp = EXCLUDED.ingestion_timestamp
                "#,
            )
            .bind(&record.city_id)
            .bind(&record.city_name)
            .bind(&record.state_id)
            .bind(&record.state_name)
            .bind(&record.country_id)
            .bind(record.applicable_on)
            .bind(&record.raw_data)
            .bind(record.ingestion_timestamp)
            .execute(&mut *db_tx)
            .await?;
        }

        db_tx.commit().await?;
        Ok(records.len())
    }

    async fn load_bronze(&self, selection: BronzeSelection) -> Result<Vec<BronzeRecord>, StoreError> {
        const COLUMNS: &str = "city_id, city_name, state_id, state_name, country_id, \
                               applicable_on, raw_data, ingestion_timestamp";

        let rows = match selection {
            BronzeSelection::ApplicableBetween { start, end } => {
                sqlx::query(&format!(
                    "SELECT {COLUMNS} FROM bronze_fuel_prices \
                     WHERE applicable_on BETWEEN $1 AND $2 \
                     ORDER BY city_id, applicable_on"
                ))
                .bind(start)
                .bind(end)
                .fetch_all(&self.pool)
                .await?
            }
            BronzeSelection::IngestedSince(since) => {
                sqlx::query(&format!(
                    "SELECT {COLUMNS} FROM bronze_fuel_prices \
                     WHERE ingestion_timestamp >= $1 \
                     ORDER BY city_id, applicable_on"
                ))
                .bind(since)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(bronze_from_row).collect()
    }

    async fn upsert_silver(&self, records: &[SilverRecord]) -> Result<usize, StoreError> {
        let mut db_tx = self.pool.begin().await?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO silver_fuel_prices
                    (city_id, city_name, state_id, state_name, applicable_on, fuel_type,
                     retail_price, price_change, change_interval, retail_unit, currency,
                     processed_timestamp)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                ON CONFLICT (city_id, applicable_on, fuel_type) DO UPDATE SET
                    city_name = EXCLUDED.city_name,
                    state_id = EXCLUDED.state_id,
                    state_name = EXCLUDED.state_name,
                    retail_price = EXCLUDED.retail_price,
                    price_change = EXCLUDED.price_change,
                    change_interval = EXCLUDED.change_interval,
                    retail_unit = EXCLUDED.retail_unit,
                    currency = EXCLUDED.currency,
                    processed_timestamp = EXCLUDED.processed_timestamp
                "#,
            )
            .bind(&record.city_id)
            .bind(&record.city_name)
            .bind(&record.state_id)
            .bind(&record.state_name)
            .bind(record.applicable_on)
            .bind(record.fuel_type.as_str())
            .bind(record.retail_price)
            .bind(record.price_change)
            .bind(&record.change_interval)
            .bind(&record.retail_unit)
            .bind(&record.currency)
            .bind(record.processed_timestamp)
            .execute(&mut *db_tx)
            .await?;
        }

        db_tx.commit().await?;
        Ok(records.len())
    }

    async fn load_silver(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<SilverRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT city_id, city_name, state_id, state_name, applicable_on, fuel_type,
                   retail_price, price_change, change_interval, retail_unit, currency,
                   processed_timestamp
            FROM silver_fuel_prices
            WHERE applicable_on BETWEEN $1 AND $2
            ORDER BY city_id, fuel_type, applicable_on
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(silver_from_row).collect()
    }

    async fn upsert_state_analytics(&self, rows: &[GoldStateAnalytics]) -> Result<usize, StoreError> {
        let mut db_tx = self.pool.begin().await?;

        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO gold_state_analytics
                    (state_id, state_name, report_date, fuel_type, avg_price, min_price,
                     max_price, price_std_dev, city_count, computed_timestamp)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (state_id, report_date, fuel_type) DO UPDATE SET
                    state_name = EXCLUDED.state_name,
                    avg_price = EXCLUDED.avg_price,
                    min_price = EXCLUDED.min_price,
                    max_price = EXCLUDED.max_price,
                    price_std_dev = EXCLUDED.price_std_dev,
                    city_count = EXCLUDED.city_count,
                    computed_timestamp = EXCLUDED.computed_timestamp
                "#,
            )
            .bind(&row.state_id)
            .bind(&row.state_name)
            .bind(row.report_date)
            .bind(row.fuel_type.as_str())
            .bind(row.avg_price)
            .bind(row.min_price)
            .bind(row.max_price)
            .bind(row.price_std_dev)
            .bind(row.city_count)
            .bind(row.computed_timestamp)
            .execute(&mut *db_tx)
            .await?;
        }

        db_tx.commit().await?;
        Ok(rows.len())
    }

    async fn upsert_price_trends(&self, rows: &[GoldPriceTrend]) -> Result<usize, StoreError> {
        let mut db_tx = self.pool.begin().await?;

        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO gold_price_trends
                    (city_id, city_name, state_id, fuel_type, trend_start_date, trend_end_date,
                     days_count, price_trend_slope, avg_daily_change, total_change,
                     start_price, end_price, computed_timestamp)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                ON CONFLICT (city_id, fuel_type, trend_start_date, trend_end_date) DO UPDATE SET
                    city_name = EXCLUDED.city_name,
                    state_id = EXCLUDED.state_id,
                    days_count = EXCLUDED.days_count,
                    price_trend_slope = EXCLUDED.price_trend_slope,
                    avg_daily_change = EXCLUDED.avg_daily_change,
                    total_change = EXCLUDED.total_change,
                    start_price = EXCLUDED.start_price,
                    end_price = EXCLUDED.end_price,
                    computed_timestamp = EXCLUDED.computed_timestamp
                "#,
            )
            .bind(&row.city_id)
            .bind(&row.city_name)
            .bind(&row.state_id)
            .bind(row.fuel_type.as_str())
            .bind(row.trend_start_date)
            .bind(row.trend_end_date)
            .bind(row.days_count)
            .bind(row.price_trend_slope)
            .bind(row.avg_daily_change)
            .bind(row.total_change)
            .bind(row.start_price)
            .bind(row.end_price)
            .bind(row.computed_timestamp)
            .execute(&mut *db_tx)
            .await?;
        }

        db_tx.commit().await?;
        Ok(rows.len())
    }

    async fn load_state_analytics(
        &self,
        report_date: Option<NaiveDate>,
    ) -> Result<Vec<GoldStateAnalytics>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT state_id, state_name, report_date, fuel_type, avg_price, min_price,
                   max_price, price_std_dev, city_count, computed_timestamp
            FROM gold_state_analytics
            WHERE report_date = COALESCE($1, (SELECT MAX(report_date) FROM gold_state_analytics))
            ORDER BY fuel_type, state_id
            "#,
        )
        .bind(report_date)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(state_from_row).collect()
    }
}

#[async_trait]
impl RunLedger for PostgresStore {
    async fn begin(&self, key: &StageKey, started_at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO etl_run_log (run_id, dag_id, task_id, layer, start_time, status)
            VALUES ($1, $2, $3, $4, $5, 'running')
            ON CONFLICT (run_id, task_id) DO UPDATE SET
                dag_id = EXCLUDED.dag_id,
                layer = EXCLUDED.layer,
                start_time = EXCLUDED.start_time,
                end_time = NULL,
                status = 'running',
                records_processed = 0,
                records_failed = 0,
                error_message = NULL,
                attempt = etl_run_log.attempt + 1
            "#,
        )
        .bind(&key.run_id)
        .bind(&key.workflow_id)
        .bind(&key.task_id)
        .bind(key.layer.as_str())
        .bind(started_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finish(
        &self,
        key: &StageKey,
        started_at: DateTime<Utc>,
        outcome: &StageOutcome,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO etl_run_log
                (run_id, dag_id, task_id, layer, records_processed, records_failed,
                 start_time, end_time, status, error_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (run_id, task_id) DO UPDATE SET
                records_processed = EXCLUDED.records_processed,
                records_failed = EXCLUDED.records_failed,
                end_time = EXCLUDED.end_time,
                status = EXCLUDED.status,
                error_message = EXCLUDED.error_message
            "#,
        )
        .bind(&key.run_id)
        .bind(&key.workflow_id)
        .bind(&key.task_id)
        .bind(key.layer.as_str())
        .bind(i32::try_from(outcome.records_processed).unwrap_or(i32::MAX))
        .bind(i32::try_from(outcome.records_failed).unwrap_or(i32::MAX))
        .bind(started_at)
        .bind(outcome.finished_at)
        .bind(outcome.status.as_str())
        .bind(&outcome.error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
