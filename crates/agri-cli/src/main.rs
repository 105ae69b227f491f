use std::sync::Arc;

use agri_connector::FixtureConnector;
use agri_core::{Clock, SystemClock};
use agri_storage::{PgStore, WarehouseStore};
use agri_sync::report::write_run_report;
use agri_sync::{IntelligencePipeline, JobKind, PipelineConfig};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::scheduler::build_scheduler;

mod scheduler;

#[derive(Debug, Parser)]
#[command(name = "agri-cli")]
#[command(about = "Agricultural intelligence ingestion and forecasting")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ingest signals and reconcile the snapshot.
    Daily,
    /// Predict yield for every tracked state and crop.
    Yield,
    /// Rebuild the 180-day supply curve for every bioenergy region.
    Supply,
    /// Refresh farm financial benchmarks.
    Benchmarks,
    /// Run all four jobs once and write a report.
    All,
    /// Apply database migrations.
    Migrate,
    /// List ingestion runs still marked running.
    Runs {
        #[arg(long, default_value_t = 120)]
        stuck_minutes: i64,
    },
    /// Run jobs on their cron schedules until interrupted.
    Schedule,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn connect(config: &PipelineConfig) -> Result<Arc<PgStore>> {
    let store = PgStore::connect(&config.database_url)
        .await
        .context("connecting to warehouse database")?;
    Ok(Arc::new(store))
}

async fn build_pipeline(config: &PipelineConfig) -> Result<IntelligencePipeline> {
    let store = connect(config).await?;
    let connector = FixtureConnector::from_path(&config.fixture_path)?;
    let registry = config.load_registry().await?;
    Ok(IntelligencePipeline::new(Arc::new(connector), store)
        .with_registry(registry)
        .with_data_source(config.data_source.clone()))
}

async fn run_single(config: &PipelineConfig, kind: JobKind) -> Result<()> {
    let report = build_pipeline(config).await?.run_job(kind).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = PipelineConfig::from_env();

    match cli.command.unwrap_or(Commands::All) {
        Commands::Daily => run_single(&config, JobKind::DailyIngestion).await?,
        Commands::Yield => run_single(&config, JobKind::YieldPredictions).await?,
        Commands::Supply => run_single(&config, JobKind::SupplyForecasts).await?,
        Commands::Benchmarks => run_single(&config, JobKind::FarmBenchmarks).await?,
        Commands::All => {
            let result = build_pipeline(&config).await?.run_all().await?;
            let report_dir = write_run_report(&config.reports_dir, &result).await?;
            for job in &result.jobs {
                println!(
                    "{}: {} records={} errors={}",
                    job.kind().dataset(),
                    job.status(),
                    job.records_processed(),
                    job.errors().len()
                );
            }
            println!("report written to {}", report_dir.display());
        }
        Commands::Migrate => {
            connect(&config).await?.migrate().await.context("running migrations")?;
            println!("migrations applied");
        }
        Commands::Runs { stuck_minutes } => {
            let store = connect(&config).await?;
            let cutoff = SystemClock.now() - chrono::Duration::minutes(stuck_minutes);
            let stuck = store.stuck_runs(cutoff).await?;
            if stuck.is_empty() {
                println!("no runs older than {stuck_minutes} minutes are still running");
            }
            for run in stuck {
                println!("{} {} started_at={}", run.id, run.dataset, run.started_at);
            }
        }
        Commands::Schedule => {
            let pipeline = Arc::new(build_pipeline(&config).await?);
            let Some(mut sched) = build_scheduler(pipeline, &config).await? else {
                eprintln!("scheduler disabled; set AGRI_SCHEDULER_ENABLED=true");
                return Ok(());
            };
            sched.start().await.context("starting scheduler")?;
            info!("scheduler running; press ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
    }

    Ok(())
}
