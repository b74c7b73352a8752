//! Silver tier: one normalized row per `(city, day, fuel)`.
//!
//! The `fuel` object of a bronze payload is modelled as a map from fuel tag
//! to price details. A fuel missing from the map yields no row at all; a fuel
//! that is present but unpriceable is a failed row.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::bronze::within;
use crate::error::{Result, ValidationError};
use crate::ledger::StageRun;
use crate::pipeline::{StageContext, StageReport};
use crate::store::BronzeSelection;
use crate::types::{
    price_in_range, round_price, BronzeRecord, FuelType, Layer, SilverRecord, CURRENCY_MAX_LEN,
    INTERVAL_MAX_LEN, UNIT_MAX_LEN,
};

pub const TASK_ID: &str = "transform_to_silver";

/// Price details for one fuel as the feed reports them. Fields stay loosely
/// typed because the feed mixes numbers and numeric strings.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct FuelDetail {
    #[serde(rename = "retailPrice", default)]
    pub retail_price: Option<Value>,
    #[serde(rename = "retailPriceChange", default)]
    pub retail_price_change: Option<Value>,
    #[serde(rename = "retailPriceChangeInterval", default)]
    pub retail_price_change_interval: Option<Value>,
    #[serde(rename = "retailUnit", default)]
    pub retail_unit: Option<Value>,
    #[serde(default)]
    pub currency: Option<Value>,
}

/// Fuels present in a payload. An entry whose value is not an object is kept
/// as an error so it can be counted as a failed row.
pub type FuelBoard = BTreeMap<FuelType, std::result::Result<FuelDetail, ValidationError>>;

pub fn fuel_board(raw_data: &Value) -> FuelBoard {
    let mut board = FuelBoard::new();
    let Some(fuels) = raw_data.get("fuel").and_then(Value::as_object) else {
        return board;
    };

    for (tag, detail) in fuels {
        let Some(fuel) = FuelType::from_tag(tag) else {
            debug!(tag = %tag, "Ignoring untracked fuel tag");
            continue;
        };
        let entry = match detail {
            Value::Null => continue,
            Value::Object(_) => serde_json::from_value::<FuelDetail>(detail.clone())
                .map_err(|_| ValidationError::MalformedFuel { fuel }),
            _ => Err(ValidationError::MalformedFuel { fuel }),
        };
        board.insert(fuel, entry);
    }
    board
}

/// Parses a JSON number or numeric string. Anything else is `None`.
pub fn parse_decimal(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.trim().to_string(),
        _ => return None,
    };
    if text.is_empty() {
        return None;
    }
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

fn text_value(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Rounds a price and checks it fits the price columns.
fn storable_price(
    fuel: FuelType,
    field: &'static str,
    raw: &Value,
    value: Decimal,
) -> std::result::Result<Decimal, ValidationError> {
    let rounded = round_price(value);
    if !price_in_range(rounded) {
        return Err(ValidationError::PriceOutOfRange {
            fuel,
            field,
            value: raw.to_string(),
        });
    }
    Ok(rounded)
}

fn bounded_text(
    value: Option<&Value>,
    field: &'static str,
    max: usize,
) -> std::result::Result<Option<String>, ValidationError> {
    let text = text_value(value);
    if let Some(text) = text.as_deref() {
        within(text, field, max)?;
    }
    Ok(text)
}

fn silver_row(
    bronze: &BronzeRecord,
    fuel: FuelType,
    detail: &FuelDetail,
    default_currency: &str,
    processed_at: DateTime<Utc>,
) -> std::result::Result<SilverRecord, ValidationError> {
    let price_value = detail
        .retail_price
        .as_ref()
        .filter(|value| !value.is_null())
        .ok_or(ValidationError::MissingPrice { fuel })?;
    let retail_price = parse_decimal(price_value).ok_or_else(|| ValidationError::InvalidPrice {
        fuel,
        value: price_value.to_string(),
    })?;
    let retail_price = storable_price(fuel, "retailPrice", price_value, retail_price)?;

    let price_change = match detail.retail_price_change.as_ref() {
        Some(raw) => match parse_decimal(raw) {
            Some(change) => Some(storable_price(fuel, "retailPriceChange", raw, change)?),
            None => None,
        },
        None => None,
    };

    Ok(SilverRecord {
        city_id: bronze.city_id.clone(),
        city_name: bronze.city_name.clone(),
        state_id: bronze.state_id.clone(),
        state_name: bronze.state_name.clone(),
        applicable_on: bronze.applicable_on,
        fuel_type: fuel,
        retail_price,
        price_change,
        change_interval: bounded_text(
            detail.retail_price_change_interval.as_ref(),
            "retailPriceChangeInterval",
            INTERVAL_MAX_LEN,
        )?,
        retail_unit: bounded_text(detail.retail_unit.as_ref(), "retailUnit", UNIT_MAX_LEN)?,
        currency: bounded_text(detail.currency.as_ref(), "currency", CURRENCY_MAX_LEN)?
            .unwrap_or_else(|| default_currency.to_string()),
        processed_timestamp: processed_at,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowFailure {
    pub city_id: String,
    pub applicable_on: NaiveDate,
    pub reason: ValidationError,
}

#[derive(Debug, Default)]
pub struct SilverBatch {
    pub records: Vec<SilverRecord>,
    pub failures: Vec<RowFailure>,
}

impl SilverBatch {
    pub fn dates(&self) -> BTreeSet<NaiveDate> {
        self.records.iter().map(|record| record.applicable_on).collect()
    }
}

/// Flattens one bronze row into its fuel rows.
pub fn transform_record(
    bronze: &BronzeRecord,
    default_currency: &str,
    processed_at: DateTime<Utc>,
) -> SilverBatch {
    let mut batch = SilverBatch::default();
    for (fuel, entry) in fuel_board(&bronze.raw_data) {
        let row = entry.and_then(|detail| {
            silver_row(bronze, fuel, &detail, default_currency, processed_at)
        });
        match row {
            Ok(record) => batch.records.push(record),
            Err(reason) => batch.failures.push(RowFailure {
                city_id: bronze.city_id.clone(),
                applicable_on: bronze.applicable_on,
                reason,
            }),
        }
    }
    batch
}

pub fn transform_records(
    bronze: &[BronzeRecord],
    default_currency: &str,
    processed_at: DateTime<Utc>,
) -> SilverBatch {
    let mut batch = SilverBatch::default();
    for record in bronze {
        let SilverBatch { records, failures } =
            transform_record(record, default_currency, processed_at);
        batch.records.extend(records);
        batch.failures.extend(failures);
    }
    batch
}

#[derive(Debug, Clone)]
pub struct SilverReport {
    pub stage: StageReport,
    /// Business dates that received at least one silver row.
    pub dates: BTreeSet<NaiveDate>,
}

/// Reprocesses the selected bronze rows into silver.
pub async fn transform_to_silver(
    ctx: &StageContext<'_>,
    selection: BronzeSelection,
) -> Result<SilverReport> {
    let stage = StageRun::open(ctx.ledger.clone(), ctx.stage_key(TASK_ID, Layer::Silver)).await;

    let bronze = match ctx.store.load_bronze(selection).await {
        Ok(bronze) => bronze,
        Err(err) => {
            stage.fail(&err, 0, 0).await;
            return Err(err.into());
        }
    };

    let batch = transform_records(&bronze, &ctx.config.currency, Utc::now());
    for failure in &batch.failures {
        warn!(
            city_id = %failure.city_id,
            applicable_on = %failure.applicable_on,
            reason = %failure.reason,
            "Skipped silver row"
        );
    }
    let failed = batch.failures.len() as u64;

    match ctx.store.upsert_silver(&batch.records).await {
        Ok(written) => {
            let report = stage.complete(written as u64, failed).await;
            info!(
                run_id = %ctx.run_id,
                bronze_rows = bronze.len(),
                records_processed = report.records_processed,
                records_failed = report.records_failed,
                status = %report.status,
                "Silver transformation finished"
            );
            Ok(SilverReport {
                stage: report,
                dates: batch.dates(),
            })
        }
        Err(err) => {
            stage.fail(&err, 0, failed).await;
            Err(err.into())
        }
    }
}
