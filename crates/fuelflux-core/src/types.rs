use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fractional digits stored for prices and price differences.
pub const PRICE_SCALE: u32 = 2;
/// Fractional digits stored for standard deviations, slopes and mean changes.
pub const STAT_SCALE: u32 = 4;

/// Exclusive bound on price magnitudes: `NUMERIC(10, 2)` holds eight
/// integer digits.
pub const PRICE_LIMIT: u32 = 100_000_000;
/// `NUMERIC(10, 4)` holds six integer digits.
pub const STD_DEV_LIMIT: u32 = 1_000_000;
/// `NUMERIC(12, 4)` holds eight integer digits.
pub const SLOPE_LIMIT: u32 = 100_000_000;

/// Column widths of the tier tables, in characters.
pub const ID_MAX_LEN: usize = 100;
pub const NAME_MAX_LEN: usize = 200;
pub const COUNTRY_MAX_LEN: usize = 50;
pub const CURRENCY_MAX_LEN: usize = 10;
pub const UNIT_MAX_LEN: usize = 50;
pub const INTERVAL_MAX_LEN: usize = 50;

/// Whether a rounded price fits the price columns.
pub fn price_in_range(value: Decimal) -> bool {
    within_limit(value, PRICE_LIMIT)
}

pub fn within_limit(value: Decimal, limit: u32) -> bool {
    value.abs() < Decimal::from(limit)
}

/// Rounds half away from zero, matching Postgres `ROUND(numeric, n)`, and
/// pins the scale so equal values always render the same.
pub fn round_price(value: Decimal) -> Decimal {
    round_to(value, PRICE_SCALE)
}

pub fn round_stat(value: Decimal) -> Decimal {
    round_to(value, STAT_SCALE)
}

fn round_to(value: Decimal, scale: u32) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(scale);
    rounded
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuelType {
    Petrol,
    Diesel,
    Lpg,
    Cng,
}

impl FuelType {
    pub const ALL: [FuelType; 4] = [
        FuelType::Petrol,
        FuelType::Diesel,
        FuelType::Lpg,
        FuelType::Cng,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FuelType::Petrol => "petrol",
            FuelType::Diesel => "diesel",
            FuelType::Lpg => "lpg",
            FuelType::Cng => "cng",
        }
    }

    /// Case-insensitive lookup of a feed tag such as `"petrol"` or `"LPG"`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        FuelType::ALL
            .into_iter()
            .find(|fuel| fuel.as_str().eq_ignore_ascii_case(tag.trim()))
    }
}

impl fmt::Display for FuelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Bronze,
    Silver,
    Gold,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Bronze => "bronze",
            Layer::Silver => "silver",
            Layer::Gold => "gold",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "bronze" => Some(Self::Bronze),
            "silver" => Some(Self::Silver),
            "gold" => Some(Self::Gold),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
    Partial,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Partial => "partial",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "partial" => Some(Self::Partial),
            _ => None,
        }
    }

    /// Status of a stage that ran to completion with per-row failures.
    /// Nothing committed while something failed counts as `Failed`.
    pub fn from_counts(processed: u64, failed: u64) -> Self {
        match (processed, failed) {
            (_, 0) => RunStatus::Success,
            (0, _) => RunStatus::Failed,
            _ => RunStatus::Partial,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw payload for one city and business date, unique on
/// `(city_id, applicable_on)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BronzeRecord {
    pub city_id: String,
    pub city_name: Option<String>,
    pub state_id: String,
    pub state_name: Option<String>,
    pub country_id: String,
    pub applicable_on: NaiveDate,
    pub raw_data: Value,
    pub ingestion_timestamp: DateTime<Utc>,
}

impl BronzeRecord {
    pub fn key(&self) -> (String, NaiveDate) {
        (self.city_id.clone(), self.applicable_on)
    }
}

/// One fuel price for one city and date, unique on
/// `(city_id, applicable_on, fuel_type)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SilverRecord {
    pub city_id: String,
    pub city_name: Option<String>,
    pub state_id: String,
    pub state_name: Option<String>,
    pub applicable_on: NaiveDate,
    pub fuel_type: FuelType,
    pub retail_price: Decimal,
    pub price_change: Option<Decimal>,
    pub change_interval: Option<String>,
    pub retail_unit: Option<String>,
    pub currency: String,
    pub processed_timestamp: DateTime<Utc>,
}

impl SilverRecord {
    pub fn key(&self) -> (String, NaiveDate, FuelType) {
        (self.city_id.clone(), self.applicable_on, self.fuel_type)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GoldStateAnalytics {
    pub state_id: String,
    pub state_name: Option<String>,
    pub report_date: NaiveDate,
    pub fuel_type: FuelType,
    pub avg_price: Decimal,
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub price_std_dev: Decimal,
    pub city_count: i32,
    pub computed_timestamp: DateTime<Utc>,
}

impl GoldStateAnalytics {
    pub fn key(&self) -> (String, NaiveDate, FuelType) {
        (self.state_id.clone(), self.report_date, self.fuel_type)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GoldPriceTrend {
    pub city_id: String,
    pub city_name: Option<String>,
    pub state_id: String,
    pub fuel_type: FuelType,
    pub trend_start_date: NaiveDate,
    pub trend_end_date: NaiveDate,
    pub days_count: i32,
    /// Price units per calendar day.
    pub price_trend_slope: Decimal,
    pub avg_daily_change: Decimal,
    pub total_change: Decimal,
    pub start_price: Decimal,
    pub end_price: Decimal,
    pub computed_timestamp: DateTime<Utc>,
}

impl GoldPriceTrend {
    pub fn key(&self) -> (String, FuelType, NaiveDate, NaiveDate) {
        (
            self.city_id.clone(),
            self.fuel_type,
            self.trend_start_date,
            self.trend_end_date,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunLogEntry {
    pub run_id: String,
    pub workflow_id: String,
    pub task_id: String,
    pub layer: Layer,
    pub records_processed: i64,
    pub records_failed: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub error_message: Option<String>,
    pub attempt: i32,
}
