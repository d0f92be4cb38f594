use std::time::Duration;

use chrono::{Datelike, Local, NaiveDate};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use scraper::{Html, Selector};
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::fetch_error::FetchError;

/// `timeframe` value the bulk endpoint uses for daily data
const DAILY_TIMEFRAME: &str = "2";

/// Client for the bulk climate data endpoint
///
/// One call fetches one station-month as CSV text. The endpoint serves the
/// whole calendar year for daily data, so callers filter by date afterwards.
#[derive(Clone)]
pub struct ClimateFeedFetcher {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ClimateFeedFetcher {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        user_agent: &str,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            timeout,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        Self::new(
            config.feed_url.clone(),
            config.fetch_timeout(),
            &config.user_agent,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the raw CSV payload for one station and month.
    ///
    /// The body is returned as served, metadata lines included.
    #[instrument(skip(self), fields(url = %self.base_url))]
    pub async fn fetch(&self, station_id: &str, year: i32, month: u32) -> Result<String, FetchError> {
        validate_request(station_id, year, month, Local::now().date_naive())?;

        let year_param = year.to_string();
        let month_param = month.to_string();
        let query = [
            ("format", "csv"),
            ("stationID", station_id.trim()),
            ("Year", year_param.as_str()),
            ("Month", month_param.as_str()),
            ("Day", "1"),
            ("timeframe", DAILY_TIMEFRAME),
            ("submit", "Download Data"),
        ];

        debug!("Requesting {:04}-{:02} for station {}", year, month, station_id);
        let response = self
            .client
            .get(&self.base_url)
            .query(&query)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        debug!("Received HTTP response with status: {}", status);

        if is_throttled(status, response.headers()) {
            let retry_after = parse_retry_after(response.headers());
            warn!(
                "Source throttled request for {:04}-{:02} (status {}, retry after {:?})",
                year, month, status, retry_after
            );
            return Err(FetchError::RateLimited { retry_after });
        }

        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(format!(
                "station {station_id} {year:04}-{month:02}"
            )));
        }

        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let bytes = response.bytes().await.map_err(|e| self.classify(e))?;
        debug!("Retrieved payload, size: {} bytes", bytes.len());

        let text = decode_body(&bytes);
        if text.trim_start_matches('\u{feff}').trim().is_empty() {
            return Err(FetchError::EmptyResponse);
        }

        Ok(text)
    }

    /// Return the `<title>` of an HTML page, used to check the source is reachable.
    #[instrument(skip(self))]
    pub async fn probe_title(&self, url: &str) -> Result<Option<String>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let html = response.text().await.map_err(|e| self.classify(e))?;
        Ok(extract_title(&html))
    }

    fn classify(&self, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Request(error)
        }
    }
}

fn validate_request(
    station_id: &str,
    year: i32,
    month: u32,
    today: NaiveDate,
) -> Result<(), FetchError> {
    if station_id.trim().is_empty() {
        return Err(FetchError::InvalidRequest(
            "station id must not be empty".to_string(),
        ));
    }

    if NaiveDate::from_ymd_opt(year, month, 1).is_none() {
        return Err(FetchError::InvalidRequest(format!(
            "{year:04}-{month:02} is not a calendar month"
        )));
    }

    if (year, month) > (today.year(), today.month()) {
        return Err(FetchError::InvalidRequest(format!(
            "{year:04}-{month:02} is in the future"
        )));
    }

    Ok(())
}

fn is_throttled(status: StatusCode, headers: &HeaderMap) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::SERVICE_UNAVAILABLE && headers.contains_key(RETRY_AFTER))
}

/// Only the delta-seconds form of `Retry-After` is understood.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn decode_body(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(e) => {
            warn!("Payload is not valid UTF-8 ({}), decoding lossily", e);
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

fn extract_title(html: &str) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    let document = Html::parse_document(html);
    let title = document
        .select(&selector)
        .next()?
        .text()
        .collect::<String>();

    let title = title.trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}
