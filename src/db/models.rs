use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One day of temperatures for a location
///
/// Keyed by `(sample_date, location)`. Any of the three readings may be
/// absent when the source marks it missing.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct DailyObservation {
    pub sample_date: NaiveDate,
    pub location: String,
    pub temp_max: Option<f64>,
    pub temp_min: Option<f64>,
    pub temp_mean: Option<f64>,
}

impl DailyObservation {
    /// True when at least one reading is present
    pub fn has_data(&self) -> bool {
        self.temp_max.is_some() || self.temp_min.is_some() || self.temp_mean.is_some()
    }

    /// Daily mean, falling back to the midpoint of min and max
    pub fn mean_or_midpoint(&self) -> Option<f64> {
        match (self.temp_mean, self.temp_min, self.temp_max) {
            (Some(mean), _, _) => Some(mean),
            (None, Some(min), Some(max)) => Some((min + max) / 2.0),
            _ => None,
        }
    }
}

// Read-side DTOs shared by services and the API
#[derive(Debug, Clone, Serialize)]
pub struct CurrentConditions {
    pub observation: DailyObservation,
    /// False when today has no data and the latest earlier day is shown instead
    pub is_today: bool,
    pub label: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthlyTemperatureSummary {
    pub month: u32,
    pub month_name: String,
    pub days_recorded: usize,
    pub days_with_data: usize,
    pub average_mean: Option<f64>,
    pub highest_max: Option<f64>,
    pub lowest_min: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct YearTemperatureSummary {
    pub location: String,
    pub year: i32,
    pub days_recorded: usize,
    pub days_with_data: usize,
    pub average_mean: Option<f64>,
    pub highest_max: Option<f64>,
    pub lowest_min: Option<f64>,
    pub monthly_summaries: Vec<MonthlyTemperatureSummary>,
}
