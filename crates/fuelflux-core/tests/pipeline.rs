mod common;

use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use fuelflux_core::config::CityTarget;
use fuelflux_core::feed::FeedError;
use fuelflux_core::pipeline::run_pipeline;
use fuelflux_core::store::MemoryStore;
use fuelflux_core::summary::latest_summary;
use fuelflux_core::types::{FuelType, RunStatus};
use fuelflux_core::{bronze, gold, silver};
use rust_decimal::Decimal;
use serde_json::json;

use common::{city_history, config, context, petrol, StubFeed};

fn dec(value: &str) -> Decimal {
    Decimal::from_str(value).unwrap()
}

fn business_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 8, 13).unwrap()
}

#[tokio::test]
async fn two_cities_flow_through_every_tier() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let config = config(vec![
        CityTarget::new("maharashtra", "mumbai"),
        CityTarget::new("delhi", "delhi"),
    ]);
    let ctx = context(&store, &config, "run-e2e");
    let feed = StubFeed::default()
        .with_city(
            "mumbai",
            city_history(
                "maharashtra",
                "mumbai",
                &[("2025-08-12", petrol(json!(103.00))), ("2025-08-13", petrol(json!(103.49)))],
            ),
        )
        .with_city(
            "delhi",
            city_history("delhi", "delhi", &[("2025-08-13", petrol(json!("94.27")))]),
        );

    let report = run_pipeline(&ctx, &feed, business_date()).await?;
    assert_eq!(report.status(), RunStatus::Success);
    assert_eq!(report.stages.len(), 3);
    assert_eq!(report.stages[0].records_processed, 3);
    assert_eq!(report.stages[1].records_processed, 3);

    let silver_rows = store.silver_rows();
    let mumbai = silver_rows
        .iter()
        .find(|r| r.city_id == "mumbai" && r.applicable_on == business_date())
        .expect("mumbai silver row");
    assert_eq!(mumbai.fuel_type, FuelType::Petrol);
    assert_eq!(mumbai.retail_price, dec("103.49"));

    let states = store.state_rows();
    let maharashtra = states
        .iter()
        .find(|r| r.state_id == "maharashtra" && r.report_date == business_date())
        .expect("maharashtra analytics");
    assert_eq!(maharashtra.avg_price, dec("103.49"));
    assert_eq!(maharashtra.min_price, dec("103.49"));
    assert_eq!(maharashtra.max_price, dec("103.49"));
    assert_eq!(maharashtra.price_std_dev, Decimal::ZERO);
    assert_eq!(maharashtra.city_count, 1);
    assert!(states
        .iter()
        .any(|r| r.state_id == "maharashtra" && r.report_date == NaiveDate::from_ymd_opt(2025, 8, 12).unwrap()));

    let trends = store.trend_rows();
    assert_eq!(trends.len(), 1);
    let trend = &trends[0];
    assert_eq!(trend.city_id, "mumbai");
    assert_eq!(trend.trend_end_date, business_date());
    assert_eq!(trend.days_count, 2);
    assert_eq!(trend.total_change, dec("0.49"));
    assert_eq!(trend.price_trend_slope, dec("0.49"));
    assert_eq!(trend.avg_daily_change, dec("0.49"));

    let summaries = latest_summary(store.as_ref(), None).await?;
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].report_date, business_date());
    assert_eq!(summaries[0].national_avg, dec("98.88"));
    assert_eq!(summaries[0].national_min, dec("94.27"));
    assert_eq!(summaries[0].national_max, dec("103.49"));
    assert_eq!(summaries[0].total_cities, 2);

    let tasks: Vec<String> = store
        .ledger_entries()
        .into_iter()
        .filter(|entry| entry.run_id == "run-e2e")
        .map(|entry| entry.task_id)
        .collect();
    assert_eq!(tasks.len(), 3);
    for task in [bronze::TASK_ID, silver::TASK_ID, gold::TASK_ID] {
        assert!(tasks.iter().any(|t| t == task), "missing ledger entry for {task}");
    }
    Ok(())
}

#[tokio::test]
async fn rerunning_the_pipeline_changes_nothing() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let config = config(vec![CityTarget::new("delhi", "delhi")]);
    let feed = StubFeed::default().with_city(
        "delhi",
        city_history(
            "delhi",
            "delhi",
            &[("2025-08-12", petrol(json!(94.00))), ("2025-08-13", petrol(json!(94.27)))],
        ),
    );

    run_pipeline(&context(&store, &config, "run-a"), &feed, business_date()).await?;
    let first = (store.bronze_rows().len(), store.silver_rows().len(), store.state_rows(), store.trend_rows());
    run_pipeline(&context(&store, &config, "run-b"), &feed, business_date()).await?;
    let second = (store.bronze_rows().len(), store.silver_rows().len(), store.state_rows(), store.trend_rows());

    assert_eq!(first.0, second.0);
    assert_eq!(first.1, second.1);
    let values = |rows: &[fuelflux_core::types::GoldStateAnalytics]| {
        rows.iter()
            .map(|r| (r.key(), r.avg_price, r.price_std_dev, r.city_count))
            .collect::<Vec<_>>()
    };
    assert_eq!(values(first.2.as_slice()), values(second.2.as_slice()));
    assert_eq!(first.3.len(), second.3.len());
    assert_eq!(first.3[0].price_trend_slope, second.3[0].price_trend_slope);
    Ok(())
}

fn maharashtra_feed(mumbai_today: f64) -> StubFeed {
    StubFeed::default()
        .with_city(
            "mumbai",
            city_history(
                "maharashtra",
                "mumbai",
                &[
                    ("2025-08-12", petrol(json!(103.00))),
                    ("2025-08-13", petrol(json!(mumbai_today))),
                ],
            ),
        )
        .with_city(
            "pune",
            city_history("maharashtra", "pune", &[("2025-08-13", petrol(json!(104.20)))]),
        )
}

#[tokio::test]
async fn gold_rows_are_replaced_in_place_when_silver_changes() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let config = config(vec![
        CityTarget::new("maharashtra", "mumbai"),
        CityTarget::new("maharashtra", "pune"),
    ]);

    run_pipeline(&context(&store, &config, "run-before"), &maharashtra_feed(103.49), business_date()).await?;
    let state_count = store.state_rows().len();
    let trend_count = store.trend_rows().len();
    assert_eq!(state_count, 2);
    assert_eq!(trend_count, 1);
    assert_eq!(store.trend_rows()[0].total_change, dec("0.49"));

    run_pipeline(&context(&store, &config, "run-after"), &maharashtra_feed(105.49), business_date()).await?;
    assert_eq!(store.silver_rows().len(), 3);

    let states = store.state_rows();
    assert_eq!(states.len(), state_count);
    let today = states
        .iter()
        .find(|r| r.report_date == business_date())
        .expect("maharashtra analytics");
    assert_eq!(today.avg_price, dec("104.85"));
    assert_eq!(today.min_price, dec("104.20"));
    assert_eq!(today.max_price, dec("105.49"));
    assert_eq!(today.price_std_dev, dec("0.9122"));
    assert_eq!(today.city_count, 2);

    let trends = store.trend_rows();
    assert_eq!(trends.len(), trend_count);
    assert_eq!(trends[0].city_id, "mumbai");
    assert_eq!(trends[0].end_price, dec("105.49"));
    assert_eq!(trends[0].price_trend_slope, dec("2.49"));
    assert_eq!(trends[0].total_change, dec("2.49"));
    Ok(())
}

#[tokio::test]
async fn a_failing_city_makes_the_run_partial() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let config = config(vec![
        CityTarget::new("delhi", "delhi"),
        CityTarget::new("kerala", "kochi"),
    ]);
    let ctx = context(&store, &config, "run-partial");
    let feed = StubFeed::default()
        .with_city("delhi", city_history("delhi", "delhi", &[("2025-08-13", petrol(json!(94.27)))]))
        .with_failure("kochi", FeedError::Transient("timed out".to_string()));

    let report = run_pipeline(&ctx, &feed, business_date()).await?;
    assert_eq!(report.stages[0].status, RunStatus::Partial);
    assert_eq!(report.status(), RunStatus::Partial);
    assert_eq!(store.silver_rows().len(), 1);
    Ok(())
}

#[tokio::test]
async fn store_outage_stops_the_run() {
    let store = Arc::new(MemoryStore::new());
    let config = config(vec![CityTarget::new("delhi", "delhi")]);
    let ctx = context(&store, &config, "run-outage");
    let feed = StubFeed::default()
        .with_city("delhi", city_history("delhi", "delhi", &[("2025-08-13", petrol(json!(94.27)))]));
    store.set_fail_writes(true);

    assert!(run_pipeline(&ctx, &feed, business_date()).await.is_err());

    let entries = store.ledger_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].task_id, bronze::TASK_ID);
    assert_eq!(entries[0].status, RunStatus::Failed);
}
