use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::{create_router, AppState};
use crate::config::Config;
use crate::db::{DbPool, ObservationRepository};
use crate::fetcher::ClimateFeedFetcher;
use crate::scheduler::{self, RefreshTarget};
use crate::services::{ChartService, IngestService, IngestSettings, ObservationService};

/// Running server plus the refresh scheduler
pub struct Application {
    pub server_handle: JoinHandle<Result<(), std::io::Error>>,
    pub scheduler_handle: JoinHandle<()>,
}

impl Application {
    /// Wire repositories, services and the fetcher, then spawn:
    /// - HTTP API server (Axum)
    /// - Refresh scheduler (`REFRESH_MINUTES` interval)
    pub async fn build(config: Config, db: DbPool) -> Result<Self, Box<dyn std::error::Error>> {
        info!("Initializing application components");

        let repo = ObservationRepository::new(db.pool().clone());

        let fetcher = ClimateFeedFetcher::from_config(&config)?;
        let ingest_service =
            IngestService::new(fetcher, repo.clone(), IngestSettings::from_config(&config));
        let observation_service = ObservationService::new(repo.clone());
        let chart_service = ChartService::new(repo.clone());

        let scheduler_handle = {
            let ingest_service = ingest_service.clone();
            let chart_service = chart_service.clone();
            let repo = repo.clone();
            let target = RefreshTarget {
                station_id: config.station_id.clone(),
                location: config.location.clone(),
                plots_dir: config.plots_dir.clone(),
            };
            let interval = config.refresh_minutes;

            tokio::spawn(async move {
                scheduler::start_refresh_scheduler(
                    ingest_service,
                    chart_service,
                    repo,
                    target,
                    interval,
                )
                .await;
            })
        };

        let app_state = AppState {
            observation_service,
            chart_service,
            ingest_service,
            station_id: config.station_id.clone(),
            location: config.location.clone(),
        };
        let app = create_router(app_state).layer(TraceLayer::new_for_http());

        let addr = config.server_addr();
        info!("Starting HTTP server on {}", addr);

        let server_handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            axum::serve(listener, app).await
        });

        info!("Application initialized successfully");

        Ok(Self {
            server_handle,
            scheduler_handle,
        })
    }

    /// Run until the server stops; the scheduler keeps running alongside it
    pub async fn run_until_stopped(self) -> Result<(), Box<dyn std::error::Error>> {
        self.server_handle.await??;
        self.scheduler_handle.abort();
        Ok(())
    }
}
