mod common;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDate;
use fuelflux_core::bronze;
use fuelflux_core::config::{CityTarget, PipelineConfig};
use fuelflux_core::error::StageError;
use fuelflux_core::feed::FeedError;
use fuelflux_core::ledger::StageRun;
use fuelflux_core::{gold, silver};
use fuelflux_core::store::{BronzeSelection, MemoryStore};
use fuelflux_core::types::{FuelType, Layer, RunStatus};
use rust_decimal::Decimal;
use serde_json::json;

use common::{all_fuels, city_history, config, context, petrol, StubFeed};

fn day(value: &str) -> NaiveDate {
    NaiveDate::from_str(value).unwrap()
}

fn whole_range() -> BronzeSelection {
    BronzeSelection::ApplicableBetween {
        start: day("2025-01-01"),
        end: day("2025-12-31"),
    }
}

#[tokio::test]
async fn reingesting_a_day_keeps_one_row_with_latest_payload() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let config = config(vec![CityTarget::new("maharashtra", "mumbai")]);
    let ctx = context(&store, &config, "run-bronze");

    let first = city_history("maharashtra", "mumbai", &[("2025-08-13", petrol(json!(103.00)))]);
    let second = city_history("maharashtra", "mumbai", &[("2025-08-13", petrol(json!(103.49)))]);

    bronze::ingest_items(&ctx, &first, 0).await?;
    let report = bronze::ingest_items(&ctx, &second, 0).await?;
    assert_eq!(report.status, RunStatus::Success);

    let rows = store.bronze_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].raw_data["fuel"]["petrol"]["retailPrice"], json!(103.49));
    Ok(())
}

#[tokio::test]
async fn failing_cities_make_a_partial_bronze_run() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let cities: Vec<CityTarget> = (0..10)
        .map(|i| CityTarget::new("state", format!("city-{i}")))
        .collect();
    let config = config(cities);
    let ctx = context(&store, &config, "run-partial");

    let mut feed = StubFeed::default();
    for i in 0..8 {
        let city = format!("city-{i}");
        feed = feed.with_city(
            &city,
            city_history("state", &city, &[("2025-08-13", petrol(json!(100)))]),
        );
    }
    feed = feed
        .with_failure("city-8", FeedError::Transient("HTTP 503".to_string()))
        .with_failure("city-9", FeedError::Permanent("HTTP 404".to_string()));

    let report = bronze::extract_to_bronze(&ctx, &feed, day("2025-08-13")).await?;
    assert_eq!(report.records_processed, 8);
    assert_eq!(report.records_failed, 2);
    assert_eq!(report.status, RunStatus::Partial);

    let entry = store
        .ledger_entry("run-partial", bronze::TASK_ID)
        .expect("ledger entry");
    assert_eq!(entry.status, RunStatus::Partial);
    assert_eq!(entry.records_processed, 8);
    assert_eq!(entry.records_failed, 2);
    assert_eq!(entry.layer, Layer::Bronze);
    assert!(entry.end_time.is_some());
    Ok(())
}

#[tokio::test]
async fn invalid_items_are_counted_not_raised() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let config = config(vec![CityTarget::new("delhi", "delhi")]);
    let ctx = context(&store, &config, "run-invalid");

    let items = city_history(
        "delhi",
        "delhi",
        &[("2025-08-13", petrol(json!(94.27))), ("not-a-date", petrol(json!(94.00)))],
    );
    let report = bronze::ingest_items(&ctx, &items, 0).await?;
    assert_eq!(report.records_processed, 1);
    assert_eq!(report.records_failed, 1);
    assert_eq!(report.status, RunStatus::Partial);
    Ok(())
}

#[tokio::test]
async fn silver_emits_one_row_per_present_fuel() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let config = config(vec![]);
    let ctx = context(&store, &config, "run-fanout");

    let mut items = city_history("maharashtra", "mumbai", &[("2025-08-13", all_fuels())]);
    items.extend(city_history(
        "delhi",
        "delhi",
        &[(
            "2025-08-13",
            json!({
                "petrol": { "retailPrice": 94.27 },
                "diesel": { "retailPrice": 87.62 }
            }),
        )],
    ));
    bronze::ingest_items(&ctx, &items, 0).await?;

    let report = silver::transform_to_silver(&ctx, whole_range()).await?;
    assert_eq!(report.stage.records_processed, 6);
    assert_eq!(report.stage.status, RunStatus::Success);
    assert_eq!(report.dates.len(), 1);

    let rows = store.silver_rows();
    assert_eq!(rows.iter().filter(|r| r.city_id == "mumbai").count(), 4);
    assert_eq!(rows.iter().filter(|r| r.city_id == "delhi").count(), 2);
    let lpg = rows
        .iter()
        .find(|r| r.fuel_type == FuelType::Lpg)
        .expect("lpg row");
    assert_eq!(lpg.retail_price.to_string(), "852.50");
    assert_eq!(lpg.retail_unit.as_deref(), Some("14.2 kg cylinder"));
    Ok(())
}

#[tokio::test]
async fn silver_rerun_reproduces_identical_values() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let config = config(vec![]);
    let ctx = context(&store, &config, "run-rerun");

    let items = city_history("maharashtra", "mumbai", &[("2025-08-13", all_fuels())]);
    bronze::ingest_items(&ctx, &items, 0).await?;

    let snapshot = |store: &MemoryStore| -> Vec<(String, String, Option<String>, String)> {
        store
            .silver_rows()
            .into_iter()
            .map(|r| {
                (
                    format!("{}/{}/{}", r.city_id, r.applicable_on, r.fuel_type),
                    r.retail_price.to_string(),
                    r.price_change.map(|c| c.to_string()),
                    r.currency,
                )
            })
            .collect()
    };

    silver::transform_to_silver(&ctx, whole_range()).await?;
    let first = snapshot(store.as_ref());
    silver::transform_to_silver(&ctx, whole_range()).await?;
    let second = snapshot(store.as_ref());

    assert_eq!(first.len(), 4);
    assert_eq!(first, second);
    Ok(())
}

#[tokio::test]
async fn silver_overwrites_when_bronze_changes() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let config = config(vec![]);
    let ctx = context(&store, &config, "run-overwrite");

    let before = city_history("delhi", "delhi", &[("2025-08-13", petrol(json!(94.00)))]);
    bronze::ingest_items(&ctx, &before, 0).await?;
    silver::transform_to_silver(&ctx, whole_range()).await?;

    let after = city_history("delhi", "delhi", &[("2025-08-13", petrol(json!("94.27")))]);
    bronze::ingest_items(&ctx, &after, 0).await?;
    silver::transform_to_silver(&ctx, whole_range()).await?;

    let rows = store.silver_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].retail_price, Decimal::from_str("94.27")?);
    Ok(())
}

#[tokio::test]
async fn unpriced_fuels_fail_individually() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let config = config(vec![]);
    let ctx = context(&store, &config, "run-unpriced");

    let items = city_history(
        "kerala",
        "kochi",
        &[(
            "2025-08-13",
            json!({
                "petrol": { "retailPrice": 107.56 },
                "diesel": { "retailPrice": null },
                "cng": { "retailPrice": "--" }
            }),
        )],
    );
    bronze::ingest_items(&ctx, &items, 0).await?;

    let report = silver::transform_to_silver(&ctx, whole_range()).await?;
    assert_eq!(report.stage.records_processed, 1);
    assert_eq!(report.stage.records_failed, 2);
    assert_eq!(report.stage.status, RunStatus::Partial);

    let entry = store
        .ledger_entry("run-unpriced", silver::TASK_ID)
        .expect("silver ledger entry");
    assert_eq!(entry.status, RunStatus::Partial);
    assert_eq!(entry.layer, Layer::Silver);
    Ok(())
}

#[tokio::test]
async fn write_failure_fails_the_stage_and_its_ledger_entry() {
    let store = Arc::new(MemoryStore::new());
    let config = config(vec![]);
    let ctx = context(&store, &config, "run-write-failure");
    store.set_fail_writes(true);

    let items = city_history("delhi", "delhi", &[("2025-08-13", petrol(json!(94.27)))]);
    let result = bronze::ingest_items(&ctx, &items, 0).await;
    assert!(result.is_err());

    let entry = store
        .ledger_entry("run-write-failure", bronze::TASK_ID)
        .expect("ledger entry");
    assert_eq!(entry.status, RunStatus::Failed);
    assert!(entry
        .error_message
        .as_deref()
        .is_some_and(|message| message.contains("writes disabled")));
    assert!(store.bronze_rows().is_empty());
}

#[tokio::test]
async fn ledger_failure_does_not_change_the_outcome() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let config = config(vec![]);
    let ctx = context(&store, &config, "run-ledger-down");
    store.set_fail_ledger(true);

    let items = city_history("delhi", "delhi", &[("2025-08-13", petrol(json!(94.27)))]);
    let report = bronze::ingest_items(&ctx, &items, 0).await?;

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.records_processed, 1);
    assert_eq!(store.bronze_rows().len(), 1);
    assert!(store.ledger_entries().is_empty());
    Ok(())
}

#[tokio::test]
async fn retried_task_reuses_its_ledger_row() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let config = config(vec![]);
    let ctx = context(&store, &config, "run-retry");

    let items = city_history("delhi", "delhi", &[("2025-08-13", petrol(json!(94.27)))]);
    bronze::ingest_items(&ctx, &items, 0).await?;
    bronze::ingest_items(&ctx, &items, 0).await?;

    let entries = store.ledger_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].attempt, 2);
    assert_eq!(entries[0].status, RunStatus::Success);
    Ok(())
}

#[tokio::test]
async fn abandoned_stage_is_closed_as_failed() {
    let store = Arc::new(MemoryStore::new());
    let config = config(vec![]);
    let ctx = context(&store, &config, "run-abandoned");

    let stage = StageRun::open(ctx.ledger.clone(), ctx.stage_key("abandoned_task", Layer::Gold)).await;
    assert_eq!(
        store
            .ledger_entry("run-abandoned", "abandoned_task")
            .map(|entry| entry.status),
        Some(RunStatus::Running)
    );
    drop(stage);
    tokio::time::sleep(Duration::from_millis(20)).await;

    let entry = store
        .ledger_entry("run-abandoned", "abandoned_task")
        .expect("ledger entry");
    assert_eq!(entry.status, RunStatus::Failed);
    assert!(entry.end_time.is_some());
}

#[tokio::test]
async fn unstorable_price_fails_its_row_and_commits_the_rest() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let config = config(vec![]);
    let ctx = context(&store, &config, "run-unstorable");

    let mut items = city_history(
        "maharashtra",
        "mumbai",
        &[("2025-08-13", petrol(json!("100000000000000000000")))],
    );
    items.extend(city_history("maharashtra", "pune", &[("2025-08-13", petrol(json!(104.20)))]));
    bronze::ingest_items(&ctx, &items, 0).await?;

    let report = silver::transform_to_silver(&ctx, whole_range()).await?;
    assert_eq!(report.stage.records_processed, 1);
    assert_eq!(report.stage.records_failed, 1);
    assert_eq!(report.stage.status, RunStatus::Partial);

    let rows = store.silver_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].city_id, "pune");
    assert_eq!(rows[0].retail_price, Decimal::from_str("104.20")?);
    let entry = store
        .ledger_entry("run-unstorable", silver::TASK_ID)
        .expect("silver ledger entry");
    assert_eq!(entry.status, RunStatus::Partial);

    let gold_report = gold::aggregate_to_gold(&ctx, &[day("2025-08-13")], day("2025-08-13")).await?;
    assert_eq!(gold_report.status, RunStatus::Success);
    let states = store.state_rows();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].city_count, 1);
    assert_eq!(states[0].max_price, Decimal::from_str("104.20")?);
    Ok(())
}

#[tokio::test]
async fn unrepresentable_trend_window_fails_the_gold_stage() {
    let store = Arc::new(MemoryStore::new());
    let config = PipelineConfig {
        trend_window_days: u32::MAX,
        ..config(vec![])
    };
    let ctx = context(&store, &config, "run-huge-window");

    let result = gold::aggregate_to_gold(&ctx, &[day("2025-08-13")], day("2025-08-13")).await;
    assert!(matches!(result, Err(StageError::InvalidWindow { days: u32::MAX, .. })));

    let entry = store
        .ledger_entry("run-huge-window", gold::TASK_ID)
        .expect("gold ledger entry");
    assert_eq!(entry.status, RunStatus::Failed);
    assert!(store.state_rows().is_empty());
}
