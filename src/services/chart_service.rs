use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::db::{ObservationRepository, StoreError, YearScope};
use crate::services::observation_service::month_name;

#[derive(Error, Debug)]
pub enum ChartError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to write chart artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize chart: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid month: {0}")]
    InvalidMonth(u32),
}

/// Five-number summary, quartiles by linear interpolation
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoxStats {
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
}

impl BoxStats {
    /// `None` for an empty sample
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        Some(Self {
            min: sorted[0],
            q1: percentile(&sorted, 0.25),
            median: percentile(&sorted, 0.5),
            q3: percentile(&sorted, 0.75),
            max: sorted[sorted.len() - 1],
        })
    }
}

fn percentile(sorted: &[f64], fraction: f64) -> f64 {
    let position = fraction * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthBox {
    pub month: u32,
    pub label: String,
    /// Daily means in date order
    pub values: Vec<f64>,
    pub stats: Option<BoxStats>,
}

/// Box-plot data: x = month 1..=12, y = distribution of the daily mean
#[derive(Debug, Clone, Serialize)]
pub struct MonthlyDistribution {
    pub location: String,
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub months: Vec<MonthBox>,
}

impl MonthlyDistribution {
    pub fn has_values(&self) -> bool {
        self.months.iter().any(|m| !m.values.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LinePoint {
    pub day: u32,
    pub value: f64,
}

/// Line-plot data: x = day of month, y = daily mean
#[derive(Debug, Clone, Serialize)]
pub struct LineSeries {
    pub location: String,
    pub year: i32,
    pub month: u32,
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub points: Vec<LinePoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChartArtifacts {
    pub monthly_distribution: PathBuf,
    pub line: Option<PathBuf>,
}

#[derive(Clone)]
pub struct ChartService {
    repo: ObservationRepository,
}

impl ChartService {
    pub fn new(repo: ObservationRepository) -> Self {
        Self { repo }
    }

    /// Daily means grouped by calendar month across the selected years.
    /// Days without a mean or a min/max pair are left out.
    #[instrument(skip(self))]
    pub async fn monthly_distribution(
        &self,
        location: &str,
        scope: YearScope,
    ) -> Result<MonthlyDistribution, ChartError> {
        let groups = self.repo.monthly_groups(location, scope).await?;

        let months = groups
            .into_iter()
            .map(|group| {
                let values: Vec<f64> = group
                    .observations
                    .iter()
                    .filter_map(|o| o.mean_or_midpoint())
                    .collect();
                MonthBox {
                    month: group.month,
                    label: month_name(group.month).chars().take(3).collect(),
                    stats: BoxStats::from_values(&values),
                    values,
                }
            })
            .collect();

        Ok(MonthlyDistribution {
            location: location.to_string(),
            title: "Mean Temperature Distribution by Month".to_string(),
            x_label: "Month".to_string(),
            y_label: "Mean (°C)".to_string(),
            months,
        })
    }

    #[instrument(skip(self))]
    pub async fn daily_line(
        &self,
        location: &str,
        year: i32,
        month: u32,
    ) -> Result<LineSeries, ChartError> {
        if !(1..=12).contains(&month) {
            return Err(ChartError::InvalidMonth(month));
        }

        let observations = self.repo.find_by_year_month(location, year, month).await?;
        let points: Vec<LinePoint> = observations
            .iter()
            .filter_map(|o| {
                o.mean_or_midpoint().map(|value| LinePoint {
                    day: o.sample_date.day(),
                    value,
                })
            })
            .collect();
        debug!("{} points for {:04}-{:02}", points.len(), year, month);

        Ok(LineSeries {
            location: location.to_string(),
            year,
            month,
            title: format!("Daily Mean Temp {year:04}-{month:02}"),
            x_label: "Day".to_string(),
            y_label: "Mean (°C)".to_string(),
            points,
        })
    }

    /// Write `box_latest.json` over all years and `line_YYYY-MM.json` for the
    /// month of the newest stored row (or `today`'s month when the store is empty).
    #[instrument(skip(self))]
    pub async fn write_artifacts(
        &self,
        location: &str,
        plots_dir: &Path,
        today: NaiveDate,
    ) -> Result<ChartArtifacts, ChartError> {
        tokio::fs::create_dir_all(plots_dir).await?;

        let distribution = self.monthly_distribution(location, YearScope::All).await?;
        let box_path = plots_dir.join("box_latest.json");
        write_json(&box_path, &distribution).await?;

        let latest = self.repo.latest_date(location).await?.unwrap_or(today);
        let line = self
            .daily_line(location, latest.year(), latest.month())
            .await?;

        let line_path = if line.points.is_empty() {
            debug!("No usable values for {:04}-{:02}, skipping line chart", line.year, line.month);
            None
        } else {
            let path = plots_dir.join(format!("line_{:04}-{:02}.json", line.year, line.month));
            write_json(&path, &line).await?;
            Some(path)
        };

        info!("Chart artifacts written to {}", plots_dir.display());
        Ok(ChartArtifacts {
            monthly_distribution: box_path,
            line: line_path,
        })
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ChartError> {
    let body = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, body).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_stats_odd_sample() {
        let stats = BoxStats::from_values(&[5.0, 1.0, 3.0, 2.0, 4.0]).unwrap();
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.q1, 2.0);
        assert_eq!(stats.median, 3.0);
        assert_eq!(stats.q3, 4.0);
        assert_eq!(stats.max, 5.0);
    }

    #[test]
    fn test_box_stats_interpolates() {
        let stats = BoxStats::from_values(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(stats.q1, 1.75);
        assert_eq!(stats.median, 2.5);
        assert_eq!(stats.q3, 3.25);
    }

    #[test]
    fn test_box_stats_single_and_empty() {
        let stats = BoxStats::from_values(&[-7.5]).unwrap();
        assert_eq!(stats.min, -7.5);
        assert_eq!(stats.median, -7.5);
        assert_eq!(stats.max, -7.5);

        assert!(BoxStats::from_values(&[]).is_none());
    }
}
