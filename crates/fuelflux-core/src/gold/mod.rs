//! Gold tier: per-state statistics and per-city price trends derived from
//! silver. Both tables are recomputed from scratch for the requested dates,
//! so rerunning a date replaces its rows with identical values.

mod state;
mod trend;

pub use state::{aggregate_states, sample_std_dev};
pub use trend::{compute_trends, regression_slope, TrendWindow};

use std::collections::BTreeSet;

use chrono::{NaiveDate, Utc};
use tracing::info;

use crate::error::{Result, StageError, StoreError};
use crate::ledger::StageRun;
use crate::pipeline::{StageContext, StageReport};
use crate::types::{GoldPriceTrend, GoldStateAnalytics, Layer};

pub const TASK_ID: &str = "aggregate_to_gold";

#[derive(Debug, Default)]
pub struct GoldBatch {
    pub state_analytics: Vec<GoldStateAnalytics>,
    pub price_trends: Vec<GoldPriceTrend>,
}

async fn build_batch(
    ctx: &StageContext<'_>,
    report_dates: &BTreeSet<NaiveDate>,
    window: TrendWindow,
) -> std::result::Result<GoldBatch, StoreError> {
    let computed_at = Utc::now();
    let first = report_dates.first().copied().map_or(window.start, |d| d.min(window.start));
    let last = report_dates.last().copied().map_or(window.end, |d| d.max(window.end));
    let silver = ctx.store.load_silver(first, last).await?;

    let mut batch = GoldBatch::default();
    for date in report_dates {
        batch
            .state_analytics
            .extend(aggregate_states(&silver, *date, computed_at));
    }
    batch.price_trends = compute_trends(
        &silver,
        window,
        ctx.config.trend_min_points(),
        computed_at,
    );
    Ok(batch)
}

async fn write_batch(ctx: &StageContext<'_>, batch: &GoldBatch) -> std::result::Result<usize, StoreError> {
    let states = ctx.store.upsert_state_analytics(&batch.state_analytics).await?;
    let trends = ctx.store.upsert_price_trends(&batch.price_trends).await?;
    Ok(states + trends)
}

/// Recomputes state analytics for each of `report_dates` and the trailing
/// price trends ending at `trend_end`.
pub async fn aggregate_to_gold(
    ctx: &StageContext<'_>,
    report_dates: &[NaiveDate],
    trend_end: NaiveDate,
) -> Result<StageReport> {
    let stage = StageRun::open(ctx.ledger.clone(), ctx.stage_key(TASK_ID, Layer::Gold)).await;
    let dates: BTreeSet<NaiveDate> = report_dates.iter().copied().collect();
    let days = ctx.config.trend_window_days;
    let Some(window) = TrendWindow::trailing(trend_end, days) else {
        let err = StageError::InvalidWindow { end: trend_end, days };
        stage.fail(&err, 0, 0).await;
        return Err(err);
    };

    let outcome = match build_batch(ctx, &dates, window).await {
        Ok(batch) => write_batch(ctx, &batch).await.map(|written| (batch, written)),
        Err(err) => Err(err),
    };

    match outcome {
        Ok((batch, written)) => {
            let report = stage.complete(written as u64, 0).await;
            info!(
                run_id = %ctx.run_id,
                report_dates = dates.len(),
                state_rows = batch.state_analytics.len(),
                trend_rows = batch.price_trends.len(),
                window_start = %window.start,
                window_end = %window.end,
                status = %report.status,
                "Gold aggregation finished"
            );
            Ok(report)
        }
        Err(err) => {
            stage.fail(&err, 0, 0).await;
            Err(err.into())
        }
    }
}
