use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use console::style;
use tracing::info;
use tracing_subscriber::EnvFilter;

use plantsync::config::{load_settings, Settings};
use plantsync::fetch::{ApiFetcher, EndpointConfig, HttpClient};
use plantsync::models::{DateRange, DomainType, SyncStatus};
use plantsync::repository::migrations::run_migrations;
use plantsync::repository::{
    create_diesel_pool, DieselEntityRepository, DieselPlantRepository, DieselSyncLogRepository,
    SqlitePool,
};
use plantsync::sync::context::DateRanges;
use plantsync::sync::{RunOutcome, SyncOrchestrator, SyncReport, SyncRequest};

/// Plant maintenance data synchronization
#[derive(Parser)]
#[command(name = "plantsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Data directory (overrides the configured target)
    #[arg(long, global = true, env = "PLANTSYNC_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch and merge domain data from the maintenance API
    Sync(SyncArgs),

    /// Show recent Run Log entries and row counts
    Status {
        /// Number of Run Log rows to show
        #[arg(short, long, default_value_t = 20)]
        limit: u32,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Create or update the database schema
    Migrate,
}

#[derive(Args)]
struct SyncArgs {
    /// Plant code to sync (repeatable; default: all active plants)
    #[arg(short, long = "plant")]
    plants: Vec<String>,

    /// Domain type to sync (repeatable; default: all)
    #[arg(short = 't', long = "type", value_parser = parse_domain_type)]
    types: Vec<DomainType>,

    /// Start of the date window (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,

    /// End of the date window (YYYY-MM-DD)
    #[arg(long)]
    to: Option<NaiveDate>,

    /// Window of this many days ending today
    #[arg(long, conflicts_with_all = ["from", "to"])]
    days: Option<u32>,

    /// Run even if another sync appears to be in progress
    #[arg(long)]
    force: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Maintenance API base URL
    #[arg(long, env = "PLANTSYNC_API_URL")]
    api_url: Option<String>,

    /// Maintenance API bearer token
    #[arg(long, env = "PLANTSYNC_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,
}

fn parse_domain_type(s: &str) -> Result<DomainType, String> {
    DomainType::from_str(s).ok_or_else(|| {
        let names: Vec<&str> = DomainType::ALL.iter().map(|d| d.as_str()).collect();
        format!("unknown domain type '{}' (expected one of: {})", s, names.join(", "))
    })
}

impl SyncArgs {
    fn date_range(&self) -> Option<DateRange> {
        let today = Local::now().date_naive();
        if let Some(days) = self.days {
            return Some(DateRange::last_days(today, days));
        }
        match (self.from, self.to) {
            (Some(from), Some(to)) => Some(DateRange::new(from, to)),
            (Some(from), None) => Some(DateRange::new(from, today)),
            (None, Some(to)) => Some(DateRange::new(to, to)),
            (None, None) => None,
        }
    }

    fn request(&self) -> SyncRequest {
        SyncRequest {
            plant_codes: (!self.plants.is_empty()).then(|| self.plants.clone()),
            date_ranges: self
                .date_range()
                .map(DateRanges::uniform)
                .unwrap_or_default(),
            selected_types: (!self.types.is_empty())
                .then(|| self.types.iter().copied().collect::<BTreeSet<_>>()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("plantsync=info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut settings = load_settings().await;
    if let Some(dir) = cli.data_dir {
        settings.data_dir = dir;
    }

    match cli.command {
        Commands::Sync(args) => cmd_sync(settings, args).await,
        Commands::Status { limit, json } => cmd_status(&settings, limit, json).await,
        Commands::Migrate => {
            open_database(&settings).await?;
            println!("{} Schema ready at {}", style("✓").green(), settings.database_path().display());
            Ok(())
        }
    }
}

async fn open_database(settings: &Settings) -> Result<SqlitePool> {
    settings
        .ensure_directories()
        .with_context(|| format!("creating {}", settings.data_dir.display()))?;
    let pool = create_diesel_pool(&settings.database_path())
        .with_context(|| format!("opening {}", settings.database_path().display()))?;
    run_migrations(&pool).await.context("creating schema")?;
    Ok(pool)
}

async fn cmd_sync(mut settings: Settings, args: SyncArgs) -> Result<()> {
    if args.api_url.is_some() {
        settings.api_base_url = args.api_url.clone();
    }
    if args.api_token.is_some() {
        settings.api_token = args.api_token.clone();
    }

    let pool = open_database(&settings).await?;

    let plants = DieselPlantRepository::new(pool.clone());
    for (code, name) in &settings.plants {
        plants.upsert(code, name, true).await.context("seeding plants")?;
    }

    let sync_logs = DieselSyncLogRepository::new(pool.clone());
    if !args.force
        && sync_logs
            .has_recent_running(None, settings.running_window())
            .await?
    {
        bail!(
            "a sync started within the last {} minutes is still pending or running; use --force to run anyway",
            settings.running_window_minutes
        );
    }

    let api_url = settings
        .api_base_url
        .clone()
        .context("no API URL configured (set api_url in the config file or PLANTSYNC_API_URL)")?;
    let client = HttpClient::with_options(
        &api_url,
        settings.request_timeout(),
        settings.api_token.clone(),
        settings.user_agent.as_deref(),
    )?;
    let endpoints = EndpointConfig::default().with_overrides(&settings.endpoints);
    let fetcher = ApiFetcher::new(client, endpoints, settings.fetch_concurrency);

    let orchestrator = SyncOrchestrator::new(pool, Arc::new(fetcher), settings.orchestrator_settings());
    let report = orchestrator.sync_all(&args.request()).await?;
    info!(run_id = %report.run_id, "Run finished");

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    let failed = report.outcomes.values().filter(|o| o.is_failed()).count();
    if failed > 0 {
        bail!("{} domain type(s) failed", failed);
    }
    Ok(())
}

fn print_report(report: &SyncReport) {
    println!("{} {}", style("Run").bold(), style(&report.run_id).dim());
    for (domain, outcome) in &report.outcomes {
        match outcome {
            RunOutcome::Completed {
                processed,
                success,
                failed,
            } => println!(
                "  {} {:<24} processed {:>6}  ok {:>6}  skipped {:>6}",
                style("✓").green(),
                domain.as_str(),
                processed,
                success,
                failed
            ),
            RunOutcome::Skipped => {
                println!("  {} {:<24} skipped", style("-").dim(), domain.as_str())
            }
            RunOutcome::Failed { error } => println!(
                "  {} {:<24} {}",
                style("✗").red(),
                domain.as_str(),
                style(error).red()
            ),
        }
    }
}

async fn cmd_status(settings: &Settings, limit: u32, json: bool) -> Result<()> {
    let pool = open_database(settings).await?;
    let logs = DieselSyncLogRepository::new(pool.clone()).get_recent(limit).await?;
    let counts = DieselEntityRepository::new(pool).counts().await?;

    if json {
        let value = serde_json::json!({ "runs": logs, "counts": counts });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("{}", style("Recent runs").bold());
    if logs.is_empty() {
        println!("  (none)");
    }
    for log in &logs {
        let status = match log.status {
            SyncStatus::Completed => style(log.status.as_str()).green(),
            SyncStatus::Failed => style(log.status.as_str()).red(),
            _ => style(log.status.as_str()).yellow(),
        };
        let duration = log
            .duration()
            .map(|d| format!("{:.1}s", d.num_milliseconds() as f64 / 1000.0))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {}  {:<24} {:<10} {:>6}/{:<6} {:>8}  {}",
            log.started_at.format("%Y-%m-%d %H:%M:%S"),
            log.domain_type,
            status,
            log.success_count,
            log.processed_count,
            duration,
            log.error_message.as_deref().unwrap_or("")
        );
    }

    println!();
    println!("{}", style("Rows").bold());
    println!("  plants                 {:>8}", counts.plants);
    println!("  equipment              {:>8}", counts.equipment);
    println!("  work_orders            {:>8}", counts.work_orders);
    println!("  running_times          {:>8}", counts.running_times);
    println!("  equipment_work_orders  {:>8}", counts.equipment_work_orders);
    println!("  equipment_materials    {:>8}", counts.equipment_materials);
    println!("  daily_plant_data       {:>8}", counts.daily_plant_data);
    Ok(())
}
