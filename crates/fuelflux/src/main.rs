use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use comfy_table::Table;
use fuelflux_core::config::PipelineConfig;
use fuelflux_core::feed::RapidApiFeed;
use fuelflux_core::ledger::RunLedger;
use fuelflux_core::pipeline::{self, StageContext, StageReport};
use fuelflux_core::store::{BronzeSelection, MemoryStore, PostgresStore, WarehouseStore};
use fuelflux_core::types::RunStatus;
use fuelflux_core::{bronze, db, gold, silver, summary};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Daily fuel price ETL (bronze, silver, gold)", long_about = None)]
struct Cli {
    /// Optional TOML config file; environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Business date (YYYY-MM-DD); defaults to today in UTC
    #[arg(long, global = true)]
    date: Option<NaiveDate>,
    /// Ledger run id; a fresh UUID when omitted
    #[arg(long, global = true)]
    run_id: Option<String>,
    /// Exit with status 2 when a stage finishes partially
    #[arg(long, global = true)]
    fail_on_partial: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run database migrations
    Migrate,
    /// Fetch every configured city into bronze
    Extract,
    /// Normalize bronze rows into silver
    Transform(TransformArgs),
    /// Recompute gold state analytics and price trends
    Aggregate(AggregateArgs),
    /// Run extract, transform and aggregate in order
    Run(RunArgs),
    /// Print the national summary of the latest gold analytics
    Summary,
}

#[derive(Args, Debug, Default)]
struct TransformArgs {
    /// First applicable date to reprocess (defaults to the business date)
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Last applicable date to reprocess (defaults to the business date)
    #[arg(long)]
    to: Option<NaiveDate>,
}

#[derive(Args, Debug, Default)]
struct AggregateArgs {
    /// First report date to recompute (defaults to the business date)
    #[arg(long)]
    from: Option<NaiveDate>,
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Use an in-memory store instead of Postgres
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    let business_date = cli.date.unwrap_or_else(|| Utc::now().date_naive());
    let run_id = cli
        .run_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let status = match cli.command {
        Command::Migrate => {
            let pool = connect_pool(&config).await?;
            db::run_migrations(&pool).await?;
            info!("Database migrations applied");
            RunStatus::Success
        }
        Command::Extract => {
            let store = Arc::new(postgres_store(&config).await?);
            let ctx = StageContext::new(store.as_ref(), store.clone(), &config, run_id);
            let feed = RapidApiFeed::new(&config.feed).context("failed to configure fuel feed")?;
            let report = bronze::extract_to_bronze(&ctx, &feed, business_date).await?;
            print_stages(&[report])
        }
        Command::Transform(args) => {
            let store = Arc::new(postgres_store(&config).await?);
            let ctx = StageContext::new(store.as_ref(), store.clone(), &config, run_id);
            let selection = BronzeSelection::ApplicableBetween {
                start: args.from.unwrap_or(business_date),
                end: args.to.unwrap_or(business_date),
            };
            let report = silver::transform_to_silver(&ctx, selection).await?;
            print_stages(&[report.stage])
        }
        Command::Aggregate(args) => {
            let store = Arc::new(postgres_store(&config).await?);
            let ctx = StageContext::new(store.as_ref(), store.clone(), &config, run_id);
            let dates = date_range(args.from.unwrap_or(business_date), business_date);
            let report = gold::aggregate_to_gold(&ctx, &dates, business_date).await?;
            print_stages(&[report])
        }
        Command::Run(args) => {
            let feed = RapidApiFeed::new(&config.feed).context("failed to configure fuel feed")?;
            if args.dry_run {
                warn!("Dry run: results are kept in memory and discarded");
                let store = Arc::new(MemoryStore::new());
                run_all(store, &config, run_id, &feed, business_date).await?
            } else {
                let store = Arc::new(postgres_store(&config).await?);
                run_all(store, &config, run_id, &feed, business_date).await?
            }
        }
        Command::Summary => {
            let store = postgres_store(&config).await?;
            let summaries = summary::latest_summary(&store, cli.date).await?;
            print_summary(&summaries);
            RunStatus::Success
        }
    };

    Ok(exit_code(status, cli.fail_on_partial))
}

async fn connect_pool(config: &PipelineConfig) -> Result<db::DbPool> {
    let database_url = config.database_url()?;
    Ok(db::connect(database_url, config.database.max_connections).await?)
}

async fn postgres_store(config: &PipelineConfig) -> Result<PostgresStore> {
    Ok(PostgresStore::new(connect_pool(config).await?))
}

async fn run_all<S>(
    store: Arc<S>,
    config: &PipelineConfig,
    run_id: String,
    feed: &RapidApiFeed,
    business_date: NaiveDate,
) -> Result<RunStatus>
where
    S: WarehouseStore + RunLedger + 'static,
{
    let ledger: Arc<dyn RunLedger> = store.clone();
    let ctx = StageContext::new(store.as_ref(), ledger, config, run_id);
    let report = pipeline::run_pipeline(&ctx, feed, business_date).await?;
    print_stages(&report.stages);
    Ok(report.status())
}

fn date_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut current = start;
    while current <= end {
        dates.push(current);
        current += Duration::days(1);
    }
    dates
}

fn print_stages(reports: &[StageReport]) -> RunStatus {
    let mut table = Table::new();
    table.set_header(vec!["task", "layer", "processed", "failed", "status"]);
    for report in reports {
        table.add_row(vec![
            report.task_id.clone(),
            report.layer.as_str().to_string(),
            report.records_processed.to_string(),
            report.records_failed.to_string(),
            report.status.to_string(),
        ]);
    }
    println!("{table}");
    pipeline::overall_status(reports.iter().map(|report| report.status))
}

fn print_summary(summaries: &[summary::FuelSummary]) {
    if summaries.is_empty() {
        println!("No gold state analytics found.");
        return;
    }

    let mut table = Table::new();
    table.set_header(vec![
        "date", "fuel", "national avg", "min", "max", "states", "cities",
    ]);
    for row in summaries {
        info!(
            report_date = %row.report_date,
            fuel_type = %row.fuel_type,
            national_avg = %row.national_avg,
            national_min = %row.national_min,
            national_max = %row.national_max,
            total_cities = row.total_cities,
            "Fuel price summary"
        );
        table.add_row(vec![
            row.report_date.to_string(),
            row.fuel_type.to_string(),
            row.national_avg.to_string(),
            row.national_min.to_string(),
            row.national_max.to_string(),
            row.states.to_string(),
            row.total_cities.to_string(),
        ]);
    }
    println!("{table}");
}

fn exit_code(status: RunStatus, fail_on_partial: bool) -> ExitCode {
    match status {
        RunStatus::Success => ExitCode::SUCCESS,
        RunStatus::Partial if fail_on_partial => ExitCode::from(2),
        RunStatus::Partial => ExitCode::SUCCESS,
        RunStatus::Failed | RunStatus::Running => ExitCode::FAILURE,
    }
}
