use clap::Parser;

use weather_tracker_service::config::Config;
use weather_tracker_service::db::{DbPool, ObservationRepository};
use weather_tracker_service::fetcher::ClimateFeedFetcher;

#[derive(Parser)]
#[command(name = "check-station")]
#[command(about = "Check stored observations for a location and probe the feed site", long_about = None)]
struct Cli {
    /// Location label to check (defaults to LOCATION)
    location: Option<String>,

    /// Database connection string (defaults to DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,

    /// Skip the network check of the feed site
    #[arg(long)]
    offline: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(database_url) = cli.database_url {
        config.database_url = database_url;
    }
    let location = cli.location.unwrap_or_else(|| config.location.clone());

    let db = DbPool::connect(&config.database_url, config.db_busy_timeout()).await?;
    let repo = ObservationRepository::new(db.pool().clone());

    println!("Checking location {}...\n", location);

    let total = repo.count(&location).await?;
    println!("Total observations for {}: {}", location, total);

    let years = repo.available_years(&location).await?;
    if years.is_empty() {
        println!("No years stored yet");
    } else {
        let listed: Vec<String> = years.iter().map(|y| y.to_string()).collect();
        println!("Years with data: {}", listed.join(", "));
    }

    match repo.latest_date(&location).await? {
        Some(date) => println!("Latest stored date: {}", date),
        None => println!("Latest stored date: none"),
    }

    match repo.find_latest_with_data(&location).await? {
        Some(obs) => {
            let show = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:.1}"));
            println!(
                "Latest with data: {} (max {}, min {}, mean {})",
                obs.sample_date,
                show(obs.temp_max),
                show(obs.temp_min),
                show(obs.temp_mean)
            );
        }
        None => println!("Latest with data: none"),
    }

    if cli.offline {
        return Ok(());
    }

    let fetcher = ClimateFeedFetcher::from_config(&config)?;
    println!("\nProbing {}...", fetcher.base_url());
    match fetcher.probe_title(fetcher.base_url()).await {
        Ok(Some(title)) => println!("Feed site reachable: \"{}\"", title),
        Ok(None) => println!("Feed site reachable (no <title>)"),
        Err(e) => println!("Feed site check failed: {}", e),
    }

    Ok(())
}
