use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::db::{CurrentConditions, DailyObservation, YearScope, YearTemperatureSummary};
use crate::services::chart_service::{LineSeries, MonthlyDistribution};
use crate::services::{
    ChartError, ChartService, IngestError, IngestService, IngestionReport, IngestionRequest,
    ObservationService,
};

#[derive(Clone)]
pub struct AppState {
    pub observation_service: ObservationService,
    pub chart_service: ChartService,
    pub ingest_service: IngestService,
    /// Station and location used by `POST /ingest`
    pub station_id: String,
    pub location: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct DateRangeParams {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct YearRangeParams {
    pub from_year: Option<i32>,
    pub to_year: Option<i32>,
}

impl YearRangeParams {
    fn scope(&self) -> YearScope {
        match (self.from_year, self.to_year) {
            (None, None) => YearScope::All,
            (Some(year), None) | (None, Some(year)) => YearScope::Single(year),
            (Some(from), Some(to)) => YearScope::Range { from, to },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct IngestBody {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Serialize)]
pub struct YearsResponse {
    pub location: String,
    pub years: Vec<i32>,
}

pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health))
        .route("/observations/{location}", get(get_observations))
        .route("/observations/{location}/date/{date}", get(get_observation_by_date))
        .route("/observations/{location}/current", get(get_current))
        .route("/observations/{location}/years", get(get_years))
        .route("/charts/{location}/line/{year}/{month}", get(get_line_chart))
        .route("/charts/{location}/monthly", get(get_monthly_chart))
        .route("/summary/{location}/{year}", get(get_year_summary))
        .route("/ingest", post(run_ingest))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}

#[instrument(skip(_state))]
async fn health(State(_state): State<AppState>) -> impl IntoResponse {
    debug!("Health check requested");
    let response = HealthResponse {
        status: "healthy".to_string(),
    };
    (StatusCode::OK, Json(response))
}

#[instrument(skip(state), fields(location = %location))]
async fn get_observations(
    State(state): State<AppState>,
    Path(location): Path<String>,
    Query(params): Query<DateRangeParams>,
) -> Result<Json<Vec<DailyObservation>>, StatusCode> {
    debug!("Fetching observations for {} from {} to {}", location, params.start, params.end);
    let observations = state
        .observation_service
        .get_observations_in_range(&location, params.start, params.end)
        .await
        .map_err(|e| {
            error!("Failed to fetch observations for {}: {}", location, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    info!("Retrieved {} observations for {}", observations.len(), location);
    Ok(Json(observations))
}

#[instrument(skip(state), fields(location = %location, date = %date))]
async fn get_observation_by_date(
    State(state): State<AppState>,
    Path((location, date)): Path<(String, NaiveDate)>,
) -> Result<Json<DailyObservation>, StatusCode> {
    let observation = state
        .observation_service
        .get_observation(&location, date)
        .await
        .map_err(|e| {
            error!("Failed to fetch observation for {} on {}: {}", location, date, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or_else(|| {
            debug!("No observation for {} on {}", location, date);
            StatusCode::NOT_FOUND
        })?;

    Ok(Json(observation))
}

#[instrument(skip(state), fields(location = %location))]
async fn get_current(
    State(state): State<AppState>,
    Path(location): Path<String>,
) -> Result<Json<CurrentConditions>, StatusCode> {
    let today = Local::now().date_naive();
    let conditions = state
        .observation_service
        .get_current_conditions(&location, today)
        .await
        .map_err(|e| {
            error!("Failed to fetch current conditions for {}: {}", location, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or_else(|| {
            warn!("No observations with data for {}", location);
            StatusCode::NOT_FOUND
        })?;

    info!("{}", conditions.label);
    Ok(Json(conditions))
}

#[instrument(skip(state), fields(location = %location))]
async fn get_years(
    State(state): State<AppState>,
    Path(location): Path<String>,
) -> Result<Json<YearsResponse>, StatusCode> {
    let years = state
        .observation_service
        .get_available_years(&location)
        .await
        .map_err(|e| {
            error!("Failed to fetch available years for {}: {}", location, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(YearsResponse { location, years }))
}

#[instrument(skip(state), fields(location = %location, year = %year, month = %month))]
async fn get_line_chart(
    State(state): State<AppState>,
    Path((location, year, month)): Path<(String, i32, u32)>,
) -> Result<Json<LineSeries>, StatusCode> {
    let series = state
        .chart_service
        .daily_line(&location, year, month)
        .await
        .map_err(|e| match e {
            ChartError::InvalidMonth(month) => {
                warn!("Rejected line chart request for month {}", month);
                StatusCode::BAD_REQUEST
            }
            other => {
                error!("Failed to build line chart for {}: {}", location, other);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        })?;

    debug!("Line chart for {} has {} points", location, series.points.len());
    Ok(Json(series))
}

#[instrument(skip(state), fields(location = %location))]
async fn get_monthly_chart(
    State(state): State<AppState>,
    Path(location): Path<String>,
    Query(params): Query<YearRangeParams>,
) -> Result<Json<MonthlyDistribution>, StatusCode> {
    let distribution = state
        .chart_service
        .monthly_distribution(&location, params.scope())
        .await
        .map_err(|e| {
            error!("Failed to build monthly distribution for {}: {}", location, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(distribution))
}

#[instrument(skip(state), fields(location = %location, year = %year))]
async fn get_year_summary(
    State(state): State<AppState>,
    Path((location, year)): Path<(String, i32)>,
) -> Result<Json<YearTemperatureSummary>, StatusCode> {
    let summary = state
        .observation_service
        .get_year_summary(&location, year)
        .await
        .map_err(|e| {
            error!("Failed to build summary for {} {}: {}", location, year, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    info!(
        "Summary for {} {}: {} days recorded, {} with data",
        location, year, summary.days_recorded, summary.days_with_data
    );
    Ok(Json(summary))
}

#[instrument(skip(state))]
async fn run_ingest(
    State(state): State<AppState>,
    Json(body): Json<IngestBody>,
) -> Result<Json<IngestionReport>, StatusCode> {
    let request = IngestionRequest::new(
        state.station_id.clone(),
        state.location.clone(),
        body.start_date,
        body.end_date,
    );

    let report = state.ingest_service.ingest(&request).await.map_err(|e| {
        match e {
            IngestError::InvalidRequest(_) => {
                warn!("Rejected ingestion request: {}", e);
                StatusCode::BAD_REQUEST
            }
            IngestError::Fetch { .. } | IngestError::Parse { .. } => {
                error!("Ingestion failed upstream: {}", e);
                StatusCode::BAD_GATEWAY
            }
            IngestError::Store { .. } => {
                error!("Ingestion failed: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    })?;

    Ok(Json(report))
}
