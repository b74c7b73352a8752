//! Bronze tier: validated raw payloads keyed on `(city_id, applicable_on)`.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Result, ValidationError};
use crate::feed::{self, FeedItem, FuelFeed};
use crate::ledger::StageRun;
use crate::pipeline::{StageContext, StageReport};
use crate::types::{BronzeRecord, Layer, COUNTRY_MAX_LEN, ID_MAX_LEN, NAME_MAX_LEN};

pub const TASK_ID: &str = "extract_to_bronze";

#[derive(Debug, Clone, PartialEq)]
pub struct RejectedItem {
    pub city_id: Option<String>,
    pub reason: ValidationError,
}

#[derive(Debug, Default)]
pub struct BronzeBatch {
    pub records: Vec<BronzeRecord>,
    pub rejected: Vec<RejectedItem>,
}

fn required(value: Option<&str>, field: &'static str) -> std::result::Result<String, ValidationError> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or(ValidationError::MissingField(field))
}

/// Rejects text the destination column cannot hold.
pub(crate) fn within(
    value: &str,
    field: &'static str,
    max: usize,
) -> std::result::Result<(), ValidationError> {
    if value.chars().count() > max {
        return Err(ValidationError::FieldTooLong { field, max });
    }
    Ok(())
}

fn optional_within(
    value: Option<&str>,
    field: &'static str,
    max: usize,
) -> std::result::Result<(), ValidationError> {
    value.map_or(Ok(()), |value| within(value, field, max))
}

pub fn parse_applicable_on(payload: &Value) -> std::result::Result<NaiveDate, ValidationError> {
    let raw = payload
        .get("applicableOn")
        .and_then(Value::as_str)
        .ok_or(ValidationError::MissingField("applicableOn"))?;
    // The feed sometimes sends a full timestamp; only the calendar date matters.
    let date_part = raw.trim().get(..10).unwrap_or(raw.trim());
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map_err(|_| ValidationError::InvalidDate(raw.to_string()))
}

/// Turns one feed item into a bronze row, or says why it cannot be one.
pub fn validate_item(
    item: &FeedItem,
    country_id: &str,
    ingested_at: DateTime<Utc>,
) -> std::result::Result<BronzeRecord, ValidationError> {
    if !item.payload.is_object() {
        return Err(ValidationError::NotAnObject);
    }
    let city_id = required(item.city_id.as_deref(), "cityId")?;
    let state_id = required(item.state_id.as_deref(), "stateId")?;
    within(&city_id, "cityId", ID_MAX_LEN)?;
    within(&state_id, "stateId", ID_MAX_LEN)?;
    optional_within(item.city_name.as_deref(), "cityName", NAME_MAX_LEN)?;
    optional_within(item.state_name.as_deref(), "stateName", NAME_MAX_LEN)?;
    within(country_id, "countryId", COUNTRY_MAX_LEN)?;
    let applicable_on = parse_applicable_on(&item.payload)?;

    Ok(BronzeRecord {
        city_id,
        city_name: item.city_name.clone(),
        state_id,
        state_name: item.state_name.clone(),
        country_id: country_id.to_string(),
        applicable_on,
        raw_data: item.payload.clone(),
        ingestion_timestamp: ingested_at,
    })
}

/// Validates a batch. Items repeating a key inside the batch collapse to the
/// last one, which is what the upsert would leave behind anyway.
pub fn prepare_batch(items: &[FeedItem], country_id: &str, ingested_at: DateTime<Utc>) -> BronzeBatch {
    let mut by_key: BTreeMap<(String, NaiveDate), BronzeRecord> = BTreeMap::new();
    let mut rejected = Vec::new();

    for item in items {
        match validate_item(item, country_id, ingested_at) {
            Ok(record) => {
                if by_key.insert(record.key(), record).is_some() {
                    debug!(city_id = ?item.city_id, "Duplicate bronze key within batch; keeping latest");
                }
            }
            Err(reason) => {
                warn!(city_id = ?item.city_id, %reason, "Rejected feed item");
                rejected.push(RejectedItem {
                    city_id: item.city_id.clone(),
                    reason,
                });
            }
        }
    }

    BronzeBatch {
        records: by_key.into_values().collect(),
        rejected,
    }
}

/// Writes already-fetched items. `records_processed` counts bronze rows,
/// one per city and history day. `prior_failures` are city fetches that
/// failed before any of their days were known, so each adds one to
/// `records_failed` however many days that city would have contributed.
pub async fn ingest_items(
    ctx: &StageContext<'_>,
    items: &[FeedItem],
    prior_failures: u64,
) -> Result<StageReport> {
    let stage = StageRun::open(ctx.ledger.clone(), ctx.stage_key(TASK_ID, Layer::Bronze)).await;

    let batch = prepare_batch(items, &ctx.config.country_id, Utc::now());
    let failed = prior_failures + batch.rejected.len() as u64;

    match ctx.store.upsert_bronze(&batch.records).await {
        Ok(written) => {
            let report = stage.complete(written as u64, failed).await;
            info!(
                run_id = %ctx.run_id,
                records_processed = report.records_processed,
                records_failed = report.records_failed,
                status = %report.status,
                "Bronze ingestion finished"
            );
            Ok(report)
        }
        Err(err) => {
            stage.fail(&err, 0, failed).await;
            Err(err.into())
        }
    }
}

/// Fetches every configured city and lands the results in bronze.
pub async fn extract_to_bronze(
    ctx: &StageContext<'_>,
    feed: &dyn FuelFeed,
    business_date: NaiveDate,
) -> Result<StageReport> {
    info!(
        run_id = %ctx.run_id,
        %business_date,
        cities = ctx.config.cities.len(),
        "Fetching fuel prices"
    );
    let outcome =
        feed::fetch_cities(feed, &ctx.config.cities, ctx.config.fetch_concurrency).await;
    ingest_items(ctx, &outcome.items, outcome.failures.len() as u64).await
}
