use std::time::{Duration, Instant};

use chrono::{Datelike, Local};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use weather_tracker_service::config::Config;
use weather_tracker_service::db::{DbPool, ObservationRepository};
use weather_tracker_service::fetcher::ClimateFeedFetcher;
use weather_tracker_service::services::{IngestService, IngestSettings, IngestionRequest};

#[derive(Parser)]
#[command(name = "ingest")]
#[command(about = "Fetch daily temperatures from the climate feed into the local database", long_about = None)]
struct Cli {
    /// Database connection string (defaults to DATABASE_URL or sqlite://weather.sqlite3)
    #[arg(long)]
    database_url: Option<String>,

    /// Station identifier at the source (defaults to STATION_ID)
    #[arg(long)]
    station_id: Option<String>,

    /// Location label stored with each row (defaults to LOCATION)
    #[arg(long)]
    location: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// The current month and the months before it
    LastMonths {
        #[arg(default_value = "2")]
        months: u32,
    },
    /// One calendar month, as YYYY-MM
    Month {
        #[arg(value_parser = parse_year_month)]
        month: (i32, u32),
    },
    /// Every month between two YYYY-MM months, inclusive
    Range {
        #[arg(value_parser = parse_year_month)]
        from: (i32, u32),
        #[arg(value_parser = parse_year_month)]
        to: (i32, u32),
    },
    /// Walk backwards until the source runs out of data
    Backfill {
        /// Month to start from, as YYYY-MM (default: current month)
        #[arg(long, value_parser = parse_year_month)]
        from: Option<(i32, u32)>,

        /// Stop after this many months
        #[arg(long, default_value = "120")]
        max_months: usize,
    },
    /// Remove every stored row for the location
    DeleteLocation {
        /// Confirm the deletion
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

fn parse_year_month(value: &str) -> Result<(i32, u32), String> {
    let (year, month) = value
        .split_once('-')
        .ok_or_else(|| format!("'{value}' is not in YYYY-MM form"))?;
    let year: i32 = year
        .parse()
        .map_err(|_| format!("'{year}' is not a valid year"))?;
    let month: u32 = month
        .parse()
        .map_err(|_| format!("'{month}' is not a valid month"))?;
    if !(1..=12).contains(&month) {
        return Err(format!("month must be between 1 and 12, got {month}"));
    }
    Ok((year, month))
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

    let mut config = Config::from_env();
    if let Some(database_url) = cli.database_url {
        config.database_url = database_url;
    }
    if let Some(station_id) = cli.station_id {
        config.station_id = station_id;
    }
    if let Some(location) = cli.location {
        config.location = location;
    }

    info!("Connecting to database...");
    let db = DbPool::connect(&config.database_url, config.db_busy_timeout()).await?;
    let repo = ObservationRepository::new(db.pool().clone());

    let fetcher = ClimateFeedFetcher::from_config(&config)?;
    let service = IngestService::new(fetcher, repo.clone(), IngestSettings::from_config(&config));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping after the current month");
                cancel.cancel();
            }
        });
    }

    let today = Local::now().date_naive();
    let station = config.station_id.as_str();
    let location = config.location.as_str();

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(120));

    let start_time = Instant::now();
    let result = match cli.command {
        Command::LastMonths { months } => {
            let request = IngestionRequest::last_months(station, location, months, today)
                .ok_or("months must be at least 1")?;
            spinner.set_message(format!("Ingesting last {months} month(s) for {location}..."));
            service.ingest_with_cancel(&request, &cancel).await
        }
        Command::Month { month: (year, month) } => {
            let request = IngestionRequest::single_month(station, location, year, month)
                .ok_or("invalid month")?;
            spinner.set_message(format!("Ingesting {year:04}-{month:02} for {location}..."));
            service.ingest_with_cancel(&request, &cancel).await
        }
        Command::Range { from, to } => {
            let request = IngestionRequest::month_range(station, location, from, to)
                .ok_or("invalid month range")?;
            spinner.set_message(format!(
                "Ingesting {} to {} for {location}...",
                request.start_date, request.end_date
            ));
            service.ingest_with_cancel(&request, &cancel).await
        }
        Command::Backfill { from, max_months } => {
            let (year, month) = from.unwrap_or((today.year(), today.month()));
            spinner.set_message(format!(
                "Backfilling {location} from {year:04}-{month:02} (at most {max_months} months)..."
            ));
            service
                .backfill(station, location, year, month, max_months, &cancel)
                .await
        }
        Command::DeleteLocation { yes } => {
            spinner.finish_and_clear();
            return delete_location(&repo, location, yes).await;
        }
    };
    spinner.finish_and_clear();

    let report = result?;
    if report.cancelled {
        warn!("Ingestion was cancelled; the report covers the months completed");
    } else if !report.is_clean() {
        warn!(
            "Ingestion finished with {} month error(s) and {} skipped row(s)",
            report.errors.len(),
            report.rows_skipped
        );
    }
    info!(
        "Ingestion completed in {:.1}s: {} rows stored ({} new, {} updated), {} skipped",
        start_time.elapsed().as_secs_f64(),
        report.rows_upserted,
        report.rows_inserted,
        report.rows_updated,
        report.rows_skipped
    );
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

async fn delete_location(
    repo: &ObservationRepository,
    location: &str,
    confirmed: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let count = repo.count(location).await?;
    if !confirmed {
        println!("This would delete {count} observations for {location}.");
        println!("Re-run with --yes to confirm.");
        return Ok(());
    }

    let deleted = repo.delete_location(location).await?;
    println!("Deleted {deleted} observations for {location}.");
    Ok(())
}
