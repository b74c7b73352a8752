//! Destination tables for every tier. Every write is an insert-or-replace on
//! the tier's natural key; implementations must make that atomic per row.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::StoreError;
use crate::types::{BronzeRecord, GoldPriceTrend, GoldStateAnalytics, SilverRecord};

/// Which bronze rows a silver run should (re)process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BronzeSelection {
    /// Rows whose business date falls in `[start, end]`.
    ApplicableBetween { start: NaiveDate, end: NaiveDate },
    /// Rows written at or after the instant.
    IngestedSince(DateTime<Utc>),
}

impl BronzeSelection {
    pub fn matches(&self, record: &BronzeRecord) -> bool {
        match *self {
            BronzeSelection::ApplicableBetween { start, end } => {
                record.applicable_on >= start && record.applicable_on <= end
            }
            BronzeSelection::IngestedSince(since) => record.ingestion_timestamp >= since,
        }
    }
}

#[async_trait]
pub trait WarehouseStore: Send + Sync {
    /// Upserts on `(city_id, applicable_on)`; returns rows written.
    async fn upsert_bronze(&self, records: &[BronzeRecord]) -> Result<usize, StoreError>;

    async fn load_bronze(&self, selection: BronzeSelection) -> Result<Vec<BronzeRecord>, StoreError>;

    /// Upserts on `(city_id, applicable_on, fuel_type)`.
    async fn upsert_silver(&self, records: &[SilverRecord]) -> Result<usize, StoreError>;

    /// Silver rows with `applicable_on` in `[start, end]`.
    async fn load_silver(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<SilverRecord>, StoreError>;

    /// Upserts on `(state_id, report_date, fuel_type)`.
    async fn upsert_state_analytics(&self, rows: &[GoldStateAnalytics]) -> Result<usize, StoreError>;

    /// Upserts on `(city_id, fuel_type, trend_start_date, trend_end_date)`.
    async fn upsert_price_trends(&self, rows: &[GoldPriceTrend]) -> Result<usize, StoreError>;

    /// State analytics for `report_date`, or for the latest date present.
    async fn load_state_analytics(
        &self,
        report_date: Option<NaiveDate>,
    ) -> Result<Vec<GoldStateAnalytics>, StoreError>;
}
