//! Stage wiring: what every stage needs to run and what it reports back.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, SubsecRound, Utc};
use tracing::info;

use crate::bronze;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::feed::FuelFeed;
use crate::gold;
use crate::ledger::{RunLedger, StageKey};
use crate::silver;
use crate::store::{BronzeSelection, WarehouseStore};
use crate::types::{Layer, RunStatus};

/// Shared handles for one run. Stages borrow the store and config and record
/// themselves in the ledger under `run_id`.
pub struct StageContext<'a> {
    pub store: &'a dyn WarehouseStore,
    pub ledger: Arc<dyn RunLedger>,
    pub config: &'a PipelineConfig,
    pub run_id: String,
}

impl<'a> StageContext<'a> {
    pub fn new(
        store: &'a dyn WarehouseStore,
        ledger: Arc<dyn RunLedger>,
        config: &'a PipelineConfig,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            ledger,
            config,
            run_id: run_id.into(),
        }
    }

    pub fn stage_key(&self, task_id: &str, layer: Layer) -> StageKey {
        StageKey {
            run_id: self.run_id.clone(),
            workflow_id: self.config.workflow_id.clone(),
            task_id: task_id.to_string(),
            layer,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageReport {
    pub task_id: String,
    pub layer: Layer,
    pub records_processed: u64,
    pub records_failed: u64,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub run_id: String,
    pub business_date: NaiveDate,
    pub stages: Vec<StageReport>,
}

impl PipelineReport {
    /// Worst status across stages: any failure wins, then any partial.
    pub fn status(&self) -> RunStatus {
        overall_status(self.stages.iter().map(|stage| stage.status))
    }
}

pub fn overall_status<I>(statuses: I) -> RunStatus
where
    I: IntoIterator<Item = RunStatus>,
{
    let mut overall = RunStatus::Success;
    for status in statuses {
        match status {
            RunStatus::Failed | RunStatus::Running => return RunStatus::Failed,
            RunStatus::Partial => overall = RunStatus::Partial,
            RunStatus::Success => {}
        }
    }
    overall
}

/// Bronze, then silver over what bronze just wrote, then gold over the dates
/// silver touched plus the business date. Stops at the first stage error.
pub async fn run_pipeline(
    ctx: &StageContext<'_>,
    feed: &dyn FuelFeed,
    business_date: NaiveDate,
) -> Result<PipelineReport> {
    info!(run_id = %ctx.run_id, %business_date, "Starting pipeline run");

    let bronze_report = bronze::extract_to_bronze(ctx, feed, business_date).await?;
    // Stored timestamps keep microseconds only.
    let bronze_started = bronze_report.started_at.trunc_subsecs(6);
    let silver_report =
        silver::transform_to_silver(ctx, BronzeSelection::IngestedSince(bronze_started)).await?;

    let mut report_dates: BTreeSet<NaiveDate> = silver_report.dates.clone();
    report_dates.insert(business_date);
    let report_dates: Vec<NaiveDate> = report_dates.into_iter().collect();
    let gold_report = gold::aggregate_to_gold(ctx, &report_dates, business_date).await?;

    let report = PipelineReport {
        run_id: ctx.run_id.clone(),
        business_date,
        stages: vec![bronze_report, silver_report.stage, gold_report],
    };
    info!(run_id = %ctx.run_id, status = %report.status(), "Pipeline run finished");
    Ok(report)
}
