use std::sync::Mutex;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use weather_harvest_service::config::{parse_city_codes, DEFAULT_CITY_CODES};
use weather_harvest_service::db::{DbError, SnapshotRepository, SnapshotStore, WeatherRecord};
use weather_harvest_service::fetcher::ForecastFetcher;
use weather_harvest_service::pipeline::SnapshotCommitter;
use weather_harvest_service::services::HarvestService;

#[derive(Parser)]
#[command(name = "harvest-once")]
#[command(about = "Run a single weather harvest and replace the stored snapshot", long_about = None)]
struct Cli {
    /// Database connection string (not needed with --dry-run)
    #[arg(long, env)]
    database_url: Option<String>,

    /// Forecast site base URL
    #[arg(long, env, default_value = "https://previsao.inmet.gov.br")]
    forecast_base_url: String,

    /// IBGE city codes, ';'-separated (default: the four built-in capitals)
    #[arg(long, env)]
    city_codes: Option<String>,

    /// Number of city pages fetched in parallel
    #[arg(long, default_value = "4")]
    parallel: usize,

    /// Print normalized records as JSON instead of committing them
    #[arg(long)]
    dry_run: bool,
}

/// Holds the committed batch in memory for `--dry-run` instead of writing it
/// to the database.
#[derive(Default)]
struct CapturedSnapshot {
    records: Mutex<Vec<WeatherRecord>>,
}

impl CapturedSnapshot {
    fn take(&self) -> Vec<WeatherRecord> {
        std::mem::take(&mut *self.records.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl SnapshotStore for CapturedSnapshot {
    async fn clear_all(&self) -> Result<u64, DbError> {
        Ok(self.take().len() as u64)
    }

    async fn insert_many(&self, records: &[WeatherRecord]) -> Result<usize, DbError> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(records);
        Ok(records.len())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let city_codes = match cli.city_codes.as_deref().map(parse_city_codes) {
        Some(codes) if !codes.is_empty() => codes,
        _ => DEFAULT_CITY_CODES.iter().map(|code| code.to_string()).collect(),
    };
    let fetcher = ForecastFetcher::new(cli.forecast_base_url.clone());

    if cli.dry_run {
        let committer = SnapshotCommitter::new(CapturedSnapshot::default());
        let service = HarvestService::new(fetcher, committer.clone(), city_codes, cli.parallel);

        let report = service.run_once().await?;
        info!(
            "Dry run: {} records, {} sections dropped, {} cities failed",
            report.records_staged, report.sections_dropped, report.cities_failed
        );
        let records = committer.store().take();
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    let database_url = cli
        .database_url
        .ok_or("--database-url is required unless --dry-run is given")?;

    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let service = HarvestService::new(
        fetcher,
        SnapshotCommitter::new(SnapshotRepository::new(pool)),
        city_codes,
        cli.parallel,
    );

    let report = service.run_once().await?;
    info!(
        "Harvest finished: {} cities fetched, {} failed, {} records committed",
        report.cities_fetched,
        report.cities_failed,
        report.records_committed.unwrap_or(0)
    );
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
