use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use chrono::{Datelike, Local, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::db::observation_repository::month_bounds;
use crate::db::{ObservationRepository, StoreError, UpsertStats};
use crate::feed::{DailyFeedParser, FeedParseError, ParseStats, SkipReason};
use crate::fetch_error::FetchError;
use crate::fetcher::ClimateFeedFetcher;

/// What to ingest: one station, stored under one location label, for a date range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionRequest {
    pub station_id: String,
    pub location_label: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl IngestionRequest {
    pub fn new(
        station_id: impl Into<String>,
        location_label: impl Into<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Self {
        Self {
            station_id: station_id.into(),
            location_label: location_label.into(),
            start_date,
            end_date,
        }
    }

    /// Every day of one calendar month
    pub fn single_month(
        station_id: impl Into<String>,
        location_label: impl Into<String>,
        year: i32,
        month: u32,
    ) -> Option<Self> {
        let (start, end) = month_bounds(year, month)?;
        Some(Self::new(station_id, location_label, start, end))
    }

    /// All months between two (year, month) pairs, given in either order
    pub fn month_range(
        station_id: impl Into<String>,
        location_label: impl Into<String>,
        first: (i32, u32),
        second: (i32, u32),
    ) -> Option<Self> {
        let (older, newer) = if first <= second {
            (first, second)
        } else {
            (second, first)
        };
        let (start, _) = month_bounds(older.0, older.1)?;
        let (_, end) = month_bounds(newer.0, newer.1)?;
        Some(Self::new(station_id, location_label, start, end))
    }

    /// The current month and the `months - 1` before it, up to `today`
    pub fn last_months(
        station_id: impl Into<String>,
        location_label: impl Into<String>,
        months: u32,
        today: NaiveDate,
    ) -> Option<Self> {
        if months == 0 {
            return None;
        }
        let start = today
            .with_day(1)?
            .checked_sub_months(Months::new(months - 1))?;
        Some(Self::new(station_id, location_label, start, today))
    }

    /// Calendar months touched by the range, oldest first
    pub fn months(&self) -> Vec<(i32, u32)> {
        let mut months = Vec::new();
        let mut current = (self.start_date.year(), self.start_date.month());
        let last = (self.end_date.year(), self.end_date.month());

        while current <= last {
            months.push(current);
            current = if current.1 == 12 {
                (current.0 + 1, 1)
            } else {
                (current.0, current.1 + 1)
            };
        }
        months
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    /// Reject malformed requests and cut the range off at `today`
    fn validate(&self, today: NaiveDate) -> Result<Self, IngestError> {
        if self.station_id.trim().is_empty() {
            return Err(IngestError::InvalidRequest(
                "station id must not be empty".to_string(),
            ));
        }
        if self.location_label.trim().is_empty() {
            return Err(IngestError::InvalidRequest(
                "location label must not be empty".to_string(),
            ));
        }
        if self.start_date > self.end_date {
            return Err(IngestError::InvalidRequest(format!(
                "start date {} is after end date {}",
                self.start_date, self.end_date
            )));
        }
        if self.start_date > today {
            return Err(IngestError::InvalidRequest(format!(
                "start date {} is in the future",
                self.start_date
            )));
        }
        let mut request = self.clone();
        request.end_date = request.end_date.min(today);
        Ok(request)
    }

    fn range_label(&self) -> String {
        format!("{}..{}", self.start_date, self.end_date)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    Fetch,
    Parse,
    Store,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestStage::Fetch => "fetch",
            IngestStage::Parse => "parse",
            IngestStage::Store => "store",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageError {
    pub stage: IngestStage,
    /// `YYYY-MM` of the month being processed
    pub period: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RequestedRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Counts and failures of one ingestion run
#[derive(Debug, Clone, Serialize)]
pub struct IngestionReport {
    pub requested_range: RequestedRange,
    pub months_requested: usize,
    pub months_fetched: usize,
    /// Data rows of the requested months seen in fetched payloads, plus skipped rows
    pub rows_fetched: usize,
    pub rows_accepted: usize,
    pub rows_skipped: usize,
    /// Accepted rows of a requested month that fall outside the requested range
    pub rows_out_of_range: usize,
    pub rows_upserted: usize,
    pub rows_inserted: usize,
    pub rows_updated: usize,
    pub invalid_numbers: usize,
    pub skip_reasons: BTreeMap<SkipReason, usize>,
    pub errors: Vec<StageError>,
    pub cancelled: bool,
    /// Years whose undated row problems were already counted
    #[serde(skip)]
    years_counted: BTreeSet<i32>,
}

impl IngestionReport {
    fn new(request: &IngestionRequest, months_requested: usize) -> Self {
        Self {
            requested_range: RequestedRange {
                start: request.start_date,
                end: request.end_date,
            },
            months_requested,
            months_fetched: 0,
            rows_fetched: 0,
            rows_accepted: 0,
            rows_skipped: 0,
            rows_out_of_range: 0,
            rows_upserted: 0,
            rows_inserted: 0,
            rows_updated: 0,
            invalid_numbers: 0,
            skip_reasons: BTreeMap::new(),
            errors: Vec::new(),
            cancelled: false,
            years_counted: BTreeSet::new(),
        }
    }

    /// Count one month's slice of a payload
    ///
    /// Every month of a year gets the same whole-year payload, so rows dated
    /// in other months are left to their own pass and row-level problems are
    /// counted once per year.
    fn absorb_parse(&mut self, year: i32, stats: &ParseStats, month_rows: usize) {
        self.rows_fetched += month_rows;
        self.rows_accepted += month_rows;
        if !self.years_counted.insert(year) {
            return;
        }
        self.rows_fetched += stats.skipped;
        self.rows_skipped += stats.skipped;
        self.invalid_numbers += stats.invalid_numbers;
        for (reason, count) in &stats.skip_reasons {
            *self.skip_reasons.entry(*reason).or_insert(0) += count;
        }
    }

    fn absorb_upsert(&mut self, stats: &UpsertStats) {
        self.rows_upserted += stats.upserted;
        self.rows_inserted += stats.inserted;
        self.rows_updated += stats.updated;
    }

    /// Accepted rows that were meant to be stored
    pub fn rows_in_range(&self) -> usize {
        self.rows_accepted.saturating_sub(self.rows_out_of_range)
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.rows_skipped == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Invalid ingestion request: {0}")]
    InvalidRequest(String),

    #[error("No data could be fetched for {range}: {source}")]
    Fetch {
        range: String,
        #[source]
        source: FetchError,
    },

    #[error("No fetched payload for {range} could be parsed: {source}")]
    Parse {
        range: String,
        #[source]
        source: FeedParseError,
    },

    #[error("No rows could be stored for {range}: {source}")]
    Store {
        range: String,
        #[source]
        source: StoreError,
    },
}

/// Pacing and retry settings for the orchestrator
#[derive(Debug, Clone)]
pub struct IngestSettings {
    /// Pause between consecutive month requests
    pub request_pause: Duration,
    /// Total attempts per month while the source is rate limiting
    pub rate_limit_attempts: usize,
    /// First backoff delay; doubles on each further attempt
    pub rate_limit_base_delay: Duration,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            request_pause: Duration::from_millis(400),
            rate_limit_attempts: 3,
            rate_limit_base_delay: Duration::from_secs(2),
        }
    }
}

impl IngestSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            request_pause: Duration::from_millis(config.request_pause_ms),
            rate_limit_attempts: config.rate_limit_max_attempts.max(1),
            rate_limit_base_delay: Duration::from_millis(config.rate_limit_base_delay_ms),
        }
    }
}

enum MonthFailure {
    Fetch(FetchError),
    Parse(FeedParseError),
    Store(StoreError),
    Cancelled,
}

/// Last failure seen per stage, used to decide whether the run failed as a whole
#[derive(Default)]
struct FailureTracker {
    fetch: Option<FetchError>,
    parse: Option<FeedParseError>,
    store: Option<StoreError>,
}

impl FailureTracker {
    fn record(&mut self, report: &mut IngestionReport, year: i32, month: u32, failure: MonthFailure) {
        let period = format!("{year:04}-{month:02}");
        let (stage, message) = match failure {
            MonthFailure::Cancelled => {
                info!("Ingestion cancelled before normalizing {}", period);
                report.cancelled = true;
                return;
            }
            MonthFailure::Fetch(e) => {
                let message = e.to_string();
                self.fetch = Some(e);
                (IngestStage::Fetch, message)
            }
            MonthFailure::Parse(e) => {
                let message = e.to_string();
                self.parse = Some(e);
                (IngestStage::Parse, message)
            }
            MonthFailure::Store(e) => {
                let message = e.to_string();
                self.store = Some(e);
                (IngestStage::Store, message)
            }
        };

        warn!("{} stage failed for {}: {}", stage, period, message);
        report.errors.push(StageError {
            stage,
            period,
            message,
        });
    }

    /// A run fails only when nothing could be obtained or nothing could be stored
    fn conclude(
        self,
        report: IngestionReport,
        range: String,
    ) -> Result<IngestionReport, IngestError> {
        if report.cancelled {
            return Ok(report);
        }

        if report.rows_fetched == 0 {
            if let Some(source) = self.fetch {
                return Err(IngestError::Fetch { range, source });
            }
            if let Some(source) = self.parse {
                return Err(IngestError::Parse { range, source });
            }
        }

        if report.rows_in_range() > 0 && report.rows_upserted == 0 {
            if let Some(source) = self.store {
                return Err(IngestError::Store { range, source });
            }
        }

        Ok(report)
    }
}

/// Fetch → normalize → store pipeline
#[derive(Clone)]
pub struct IngestService {
    fetcher: ClimateFeedFetcher,
    repo: ObservationRepository,
    settings: IngestSettings,
}

impl IngestService {
    pub fn new(
        fetcher: ClimateFeedFetcher,
        repo: ObservationRepository,
        settings: IngestSettings,
    ) -> Self {
        Self {
            fetcher,
            repo,
            settings,
        }
    }

    pub async fn ingest(&self, request: &IngestionRequest) -> Result<IngestionReport, IngestError> {
        self.ingest_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Ingest every month of the request
    ///
    /// The range is cut off at today; a request starting in the future is
    /// invalid. Row-level problems and single-month failures are recorded in
    /// the report. Cancellation is checked between months and before each
    /// fetched payload is normalized; rows already stored stay stored.
    #[instrument(skip(self, cancel), fields(station_id = %request.station_id, location = %request.location_label))]
    pub async fn ingest_with_cancel(
        &self,
        request: &IngestionRequest,
        cancel: &CancellationToken,
    ) -> Result<IngestionReport, IngestError> {
        let request = &request.validate(Local::now().date_naive())?;

        let months = request.months();
        let parser = DailyFeedParser::new(request.location_label.clone());
        let mut report = IngestionReport::new(request, months.len());
        let mut failures = FailureTracker::default();

        info!(
            "Starting ingestion of {} month(s) for {}",
            months.len(),
            request.range_label()
        );

        for (index, &(year, month)) in months.iter().enumerate() {
            if index > 0 {
                self.pause().await;
            }
            if cancel.is_cancelled() {
                info!("Ingestion cancelled before {:04}-{:02}", year, month);
                report.cancelled = true;
                break;
            }

            if let Err(failure) = self
                .ingest_month(request, &parser, year, month, cancel, &mut report)
                .await
            {
                failures.record(&mut report, year, month, failure);
                if report.cancelled {
                    break;
                }
            }
        }

        let result = failures.conclude(report, request.range_label());
        if let Ok(report) = &result {
            info!(
                rows_fetched = report.rows_fetched,
                rows_accepted = report.rows_accepted,
                rows_skipped = report.rows_skipped,
                rows_upserted = report.rows_upserted,
                errors = report.errors.len(),
                cancelled = report.cancelled,
                "Ingestion finished"
            );
        }
        result
    }

    /// Run an ingestion on a background task; queries keep being served meanwhile
    pub fn spawn(
        &self,
        request: IngestionRequest,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<IngestionReport, IngestError>> {
        let service = self.clone();
        tokio::spawn(async move { service.ingest_with_cancel(&request, &cancel).await })
    }

    /// Walk backwards from `from_year`-`from_month` until the source has no
    /// more data, a month fails, or `max_months` months were processed.
    #[instrument(skip(self, cancel))]
    pub async fn backfill(
        &self,
        station_id: &str,
        location: &str,
        from_year: i32,
        from_month: u32,
        max_months: usize,
        cancel: &CancellationToken,
    ) -> Result<IngestionReport, IngestError> {
        let Some(request) =
            IngestionRequest::single_month(station_id, location, from_year, from_month)
        else {
            return Err(IngestError::InvalidRequest(format!(
                "{from_year:04}-{from_month:02} is not a calendar month"
            )));
        };
        let mut request = request.validate(Local::now().date_naive())?;

        let parser = DailyFeedParser::new(location);
        let mut report = IngestionReport::new(&request, 0);
        let mut failures = FailureTracker::default();
        let mut current = request.start_date;

        for step in 0..max_months {
            if step > 0 {
                self.pause().await;
            }
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let (year, month) = (current.year(), current.month());
            request.start_date = current;
            report.requested_range.start = current;
            report.months_requested += 1;

            match self
                .ingest_month(&request, &parser, year, month, cancel, &mut report)
                .await
            {
                Ok(0) => {
                    info!("No data for {:04}-{:02}, backfill complete", year, month);
                    break;
                }
                Ok(_) => {}
                Err(MonthFailure::Fetch(FetchError::NotFound(what))) => {
                    info!("Source has no data for {}, backfill complete", what);
                    break;
                }
                Err(failure) => {
                    failures.record(&mut report, year, month, failure);
                    break;
                }
            }

            match current.checked_sub_months(Months::new(1)) {
                Some(previous) => current = previous,
                None => break,
            }
        }

        failures.conclude(report, request.range_label())
    }

    /// Fetch, parse and store one month. Returns the number of rows stored.
    async fn ingest_month(
        &self,
        request: &IngestionRequest,
        parser: &DailyFeedParser,
        year: i32,
        month: u32,
        cancel: &CancellationToken,
        report: &mut IngestionReport,
    ) -> Result<usize, MonthFailure> {
        let raw = self
            .fetch_with_retry(&request.station_id, year, month)
            .await
            .map_err(MonthFailure::Fetch)?;
        report.months_fetched += 1;

        if cancel.is_cancelled() {
            return Err(MonthFailure::Cancelled);
        }

        let (observations, stats) = parser.parse(&raw).map_err(MonthFailure::Parse)?;

        // The daily feed serves the whole year; keep this month's slice of the request
        let month_rows: Vec<_> = observations
            .into_iter()
            .filter(|o| o.sample_date.year() == year && o.sample_date.month() == month)
            .collect();
        report.absorb_parse(year, &stats, month_rows.len());

        let (wanted, unwanted): (Vec<_>, Vec<_>) = month_rows
            .into_iter()
            .partition(|o| request.contains(o.sample_date));
        report.rows_out_of_range += unwanted.len();

        if wanted.is_empty() {
            debug!("No rows in range for {:04}-{:02}", year, month);
            return Ok(0);
        }

        let upsert = self.repo.upsert(&wanted).await.map_err(MonthFailure::Store)?;
        report.absorb_upsert(&upsert);

        if upsert.failed > 0 {
            report.errors.push(StageError {
                stage: IngestStage::Store,
                period: format!("{year:04}-{month:02}"),
                message: format!("{} of {} rows failed to store", upsert.failed, upsert.attempted),
            });
        }

        Ok(upsert.upserted)
    }

    /// Fetch one month, backing off and retrying only while rate limited
    async fn fetch_with_retry(
        &self,
        station_id: &str,
        year: i32,
        month: u32,
    ) -> Result<String, FetchError> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.settings.rate_limit_base_delay)
            .with_factor(2.0)
            .with_max_delay(Duration::from_secs(60))
            .with_max_times(self.settings.rate_limit_attempts.saturating_sub(1));

        (|| self.fetcher.fetch(station_id, year, month))
            .retry(backoff)
            .sleep(tokio::time::sleep)
            .when(FetchError::is_rate_limited)
            .notify(|e: &FetchError, delay: Duration| {
                warn!(
                    "Fetch of {:04}-{:02} throttled ({}), retrying in {:?}",
                    year, month, e, delay
                );
            })
            .await
    }

    async fn pause(&self) {
        if !self.settings.request_pause.is_zero() {
            tokio::time::sleep(self.settings.request_pause).await;
        }
    }
}
