use tracing::{info, instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use weather_tracker_service::app::Application;
use weather_tracker_service::config::Config;
use weather_tracker_service::db::DbPool;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing with environment filter support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,weather_tracker_service=debug")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env();
    info!("Starting weather tracker service with config: {:?}", config);

    info!("Connecting to database...");
    let db = DbPool::connect(&config.database_url, config.db_busy_timeout()).await?;

    let app = Application::build(config, db).await?;
    app.run_until_stopped().await
}
