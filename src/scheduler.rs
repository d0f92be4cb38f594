use std::path::PathBuf;
use std::time::Duration;

use chrono::Local;
use tokio::time;
use tracing::{debug, error, info, instrument, warn};

use crate::db::ObservationRepository;
use crate::services::{ChartService, IngestService, IngestionReport, IngestionRequest};

/// Months fetched when the store has nothing for the location yet
const SEED_MONTHS: u32 = 12;
/// Months re-fetched on each refresh to pick up late corrections
const REFRESH_MONTHS: u32 = 2;

/// What the refresh loop keeps up to date
#[derive(Debug, Clone)]
pub struct RefreshTarget {
    pub station_id: String,
    pub location: String,
    pub plots_dir: PathBuf,
}

#[instrument(skip(ingest_service, chart_service, repo), fields(interval_minutes = %interval_minutes))]
pub async fn start_refresh_scheduler(
    ingest_service: IngestService,
    chart_service: ChartService,
    repo: ObservationRepository,
    target: RefreshTarget,
    interval_minutes: u64,
) {
    let mut interval = time::interval(Duration::from_secs(interval_minutes.max(1) * 60));

    info!("Refresh scheduler started with {} minute interval", interval_minutes);

    loop {
        interval.tick().await;
        debug!("Scheduler tick - initiating refresh");

        match refresh(&ingest_service, &repo, &target).await {
            Ok(report) => {
                if report.rows_inserted > 0 {
                    info!(
                        "Refresh stored {} new and {} updated observations",
                        report.rows_inserted, report.rows_updated
                    );
                } else {
                    debug!("No new observations ({} updated)", report.rows_updated);
                }
                if !report.errors.is_empty() {
                    warn!("Refresh finished with {} stage errors", report.errors.len());
                }

                let today = Local::now().date_naive();
                if let Err(e) = chart_service
                    .write_artifacts(&target.location, &target.plots_dir, today)
                    .await
                {
                    error!("Failed to write chart artifacts: {}", e);
                }
            }
            Err(e) => {
                error!("Failed to refresh observations: {}", e);
            }
        }
    }
}

/// Seed the location if it is empty, otherwise re-fetch the recent months
#[instrument(skip(ingest_service, repo))]
async fn refresh(
    ingest_service: &IngestService,
    repo: &ObservationRepository,
    target: &RefreshTarget,
) -> Result<IngestionReport, Box<dyn std::error::Error + Send + Sync>> {
    let months = if repo.count(&target.location).await? == 0 {
        info!("No observations for {}, seeding last {} months", target.location, SEED_MONTHS);
        SEED_MONTHS
    } else {
        REFRESH_MONTHS
    };

    let today = Local::now().date_naive();
    let request =
        IngestionRequest::last_months(&target.station_id, &target.location, months, today)
            .ok_or("could not build refresh window")?;

    let report = ingest_service.ingest(&request).await?;
    Ok(report)
}
