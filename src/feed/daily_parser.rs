//! Daily feed parser
//!
//! Turns the raw CSV payload of one station-month into `DailyObservation`s.
//! Row-level problems never fail the payload: malformed rows are skipped and
//! counted, unreadable numbers become absent values. Only a payload without
//! a recognisable header row is an error.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::db::DailyObservation;
use crate::feed::header::{ColumnMap, HeaderCandidate};

/// Tokens the feed uses for "no reading", compared case-insensitively
const MISSING_MARKERS: [&str; 3] = ["", "M", "NA"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedParseError {
    #[error("No header row with a recognised date column found in payload")]
    MissingHeader,

    #[error("Header row has temperature columns but no date column")]
    MissingDateColumn,
}

/// Why a data row was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    WrongColumnCount,
    MissingDate,
    InvalidDate,
    Unreadable,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParseStats {
    /// Non-blank rows after the header
    pub total_rows: usize,
    pub accepted: usize,
    pub skipped: usize,
    /// Numeric-looking tokens that failed to parse and were stored as absent
    pub invalid_numbers: usize,
    pub skip_reasons: BTreeMap<SkipReason, usize>,
}

impl ParseStats {
    fn record_skip(&mut self, reason: SkipReason) {
        self.skipped += 1;
        *self.skip_reasons.entry(reason).or_insert(0) += 1;
    }
}

struct InvalidNumber;

/// Parser for the bulk daily CSV feed
pub struct DailyFeedParser {
    location: String,
}

impl DailyFeedParser {
    /// Create a parser that stamps every observation with `location`
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
        }
    }

    /// Parse a raw payload into observations sorted by date.
    #[instrument(skip(self, raw), fields(location = %self.location, payload_size = raw.len()))]
    pub fn parse(&self, raw: &str) -> Result<(Vec<DailyObservation>, ParseStats), FeedParseError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(raw.as_bytes());
        let mut records = reader.records();

        // Metadata lines come first; the header is the first row naming a date column
        let mut saw_headerless_temperatures = false;
        let columns = loop {
            match records.next() {
                Some(Ok(record)) => match ColumnMap::detect(&record) {
                    HeaderCandidate::Header(columns) => break columns,
                    HeaderCandidate::MissingDate => saw_headerless_temperatures = true,
                    HeaderCandidate::NotHeader => {}
                },
                Some(Err(e)) => debug!("Unreadable line before header: {}", e),
                None if saw_headerless_temperatures => {
                    warn!("Payload has temperature columns but no date column");
                    return Err(FeedParseError::MissingDateColumn);
                }
                None => {
                    warn!("No header row found in payload");
                    debug!(
                        "Payload preview (first 300 chars): {}",
                        raw.chars().take(300).collect::<String>()
                    );
                    return Err(FeedParseError::MissingHeader);
                }
            }
        };
        debug!("Found header row: {:?}", columns);
        if !columns.has_temperature_columns() {
            warn!("Header has no temperature columns, all readings will be absent");
        }

        let mut stats = ParseStats::default();
        let mut observations = Vec::new();

        for result in records {
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    stats.total_rows += 1;
                    warn!("Skipping unreadable row: {}", e);
                    stats.record_skip(SkipReason::Unreadable);
                    continue;
                }
            };

            if record.iter().all(str::is_empty) {
                continue;
            }

            stats.total_rows += 1;
            match self.parse_row(&columns, &record, &mut stats) {
                Ok(observation) => {
                    stats.accepted += 1;
                    observations.push(observation);
                }
                Err(reason) => {
                    debug!("Row {} skipped ({:?}): {:?}", stats.total_rows, reason, record);
                    stats.record_skip(reason);
                }
            }
        }

        observations.sort_by_key(|o| o.sample_date);

        if stats.skipped > 0 {
            warn!(
                "Skipped {} unparseable rows out of {}",
                stats.skipped, stats.total_rows
            );
        }
        debug!(
            "Parsed {} observations from {} rows ({} invalid numbers)",
            stats.accepted, stats.total_rows, stats.invalid_numbers
        );

        Ok((observations, stats))
    }

    fn parse_row(
        &self,
        columns: &ColumnMap,
        record: &StringRecord,
        stats: &mut ParseStats,
    ) -> Result<DailyObservation, SkipReason> {
        if record.len() != columns.width {
            return Err(SkipReason::WrongColumnCount);
        }

        let raw_date = record.get(columns.date).unwrap_or_default();
        if raw_date.is_empty() {
            return Err(SkipReason::MissingDate);
        }
        let sample_date = parse_date(raw_date).ok_or(SkipReason::InvalidDate)?;

        let mut reading = |column: Option<usize>| {
            let token = column.and_then(|index| record.get(index))?;
            match parse_temperature(token) {
                Ok(value) => value,
                Err(InvalidNumber) => {
                    debug!("Unreadable temperature '{}' on {}, treating as absent", token, sample_date);
                    stats.invalid_numbers += 1;
                    None
                }
            }
        };

        Ok(DailyObservation {
            sample_date,
            location: self.location.clone(),
            temp_max: reading(columns.max),
            temp_min: reading(columns.min),
            temp_mean: reading(columns.mean),
        })
    }
}

/// `YYYY-MM-DD`, or a date-time whose first ten characters are one
fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok().or_else(|| {
        raw.get(..10)
            .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
    })
}

/// `Ok(None)` for missing-value markers, `Err` for tokens that are not a finite number.
fn parse_temperature(token: &str) -> Result<Option<f64>, InvalidNumber> {
    let token = token.trim();
    if MISSING_MARKERS
        .iter()
        .any(|marker| marker.eq_ignore_ascii_case(token))
    {
        return Ok(None);
    }

    match token.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(Some(value)),
        _ => Err(InvalidNumber),
    }
}
