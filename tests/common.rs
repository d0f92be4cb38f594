#![allow(dead_code)]

use std::time::Duration;

use chrono::NaiveDate;
use mockito::{Matcher, ServerGuard};
use weather_tracker_service::db::{DailyObservation, DbPool, ObservationRepository};
use weather_tracker_service::fetcher::ClimateFeedFetcher;
use weather_tracker_service::services::{IngestService, IngestSettings};

pub const STATION: &str = "27174";
pub const LOCATION: &str = "Winnipeg";
pub const FEED_PATH: &str = "/climate_data/bulk_data_e.html";

/// Fresh in-memory database with migrations applied
pub async fn test_db() -> DbPool {
    DbPool::in_memory()
        .await
        .expect("Failed to create in-memory database")
}

pub async fn test_repo() -> ObservationRepository {
    ObservationRepository::new(test_db().await.pool().clone())
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn observation(
    sample_date: NaiveDate,
    max: Option<f64>,
    min: Option<f64>,
    mean: Option<f64>,
) -> DailyObservation {
    DailyObservation {
        sample_date,
        location: LOCATION.to_string(),
        temp_max: max,
        temp_min: min,
        temp_mean: mean,
    }
}

pub fn fetcher_for(server: &ServerGuard) -> ClimateFeedFetcher {
    ClimateFeedFetcher::new(
        format!("{}{}", server.url(), FEED_PATH),
        Duration::from_secs(5),
        "weather-tracker-service-tests",
    )
    .expect("Failed to build fetcher")
}

/// No pause between months and millisecond backoff so tests stay fast
pub fn fast_settings() -> IngestSettings {
    IngestSettings {
        request_pause: Duration::ZERO,
        rate_limit_attempts: 3,
        rate_limit_base_delay: Duration::from_millis(5),
    }
}

pub fn ingest_service(server: &ServerGuard, repo: &ObservationRepository) -> IngestService {
    IngestService::new(fetcher_for(server), repo.clone(), fast_settings())
}

/// Query matcher for one station-month request
pub fn month_query(year: i32, month: u32) -> Matcher {
    Matcher::AllOf(vec![
        Matcher::UrlEncoded("stationID".into(), STATION.into()),
        Matcher::UrlEncoded("Year".into(), year.to_string()),
        Matcher::UrlEncoded("Month".into(), month.to_string()),
        Matcher::UrlEncoded("timeframe".into(), "2".into()),
        Matcher::UrlEncoded("format".into(), "csv".into()),
    ])
}

/// Payload shaped like the bulk feed: quoted header with units and flag columns.
/// Each row is `(date, max, min, mean)`; use "" for a missing reading.
pub fn feed_payload(rows: &[(&str, &str, &str, &str)]) -> String {
    let mut payload = String::from(
        "\u{feff}\"Longitude (x)\",\"Latitude (y)\",\"Station Name\",\"Climate ID\",\"Date/Time\",\"Year\",\"Month\",\"Day\",\"Data Quality\",\"Max Temp (°C)\",\"Max Temp Flag\",\"Min Temp (°C)\",\"Min Temp Flag\",\"Mean Temp (°C)\",\"Mean Temp Flag\"\n",
    );
    for (day, max, min, mean) in rows {
        let parts: Vec<&str> = day.split('-').collect();
        let flag = |v: &str| if v.is_empty() { "M" } else { "" };
        payload.push_str(&format!(
            "\"-97.24\",\"49.92\",\"WINNIPEG A CS\",\"5023222\",\"{day}\",\"{}\",\"{}\",\"{}\",\"\",\"{max}\",\"{}\",\"{min}\",\"{}\",\"{mean}\",\"{}\"\n",
            parts[0],
            parts[1],
            parts[2],
            flag(max),
            flag(min),
            flag(mean),
        ));
    }
    payload
}
