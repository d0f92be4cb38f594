use chrono::NaiveDate;
use tracing::debug;

use crate::db::{
    CurrentConditions, DailyObservation, MonthGroup, MonthlyTemperatureSummary,
    ObservationRepository, StoreError, YearScope, YearTemperatureSummary,
};

#[derive(Clone)]
pub struct ObservationService {
    repo: ObservationRepository,
}

impl ObservationService {
    pub fn new(repo: ObservationRepository) -> Self {
        Self { repo }
    }

    /// Conditions for the dashboard headline
    ///
    /// Prefers `today` when it has a reading, then the latest day with data on
    /// or before `today`, then the latest day with data at all.
    pub async fn get_current_conditions(
        &self,
        location: &str,
        today: NaiveDate,
    ) -> Result<Option<CurrentConditions>, StoreError> {
        let observation = match self
            .repo
            .find_latest_with_data_on_or_before(location, today)
            .await?
        {
            Some(observation) => Some(observation),
            None => self.repo.find_latest_with_data(location).await?,
        };

        let Some(observation) = observation else {
            debug!("No observations with data for {}", location);
            return Ok(None);
        };

        let is_today = observation.sample_date == today;
        let label = Self::conditions_label(&observation, is_today);
        Ok(Some(CurrentConditions {
            observation,
            is_today,
            label,
        }))
    }

    pub async fn get_observation(
        &self,
        location: &str,
        date: NaiveDate,
    ) -> Result<Option<DailyObservation>, StoreError> {
        self.repo.find_by_date(location, date).await
    }

    pub async fn get_observations_in_range(
        &self,
        location: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyObservation>, StoreError> {
        self.repo.find_by_date_range(location, start, end).await
    }

    pub async fn get_available_years(&self, location: &str) -> Result<Vec<i32>, StoreError> {
        self.repo.available_years(location).await
    }

    /// Year totals plus a summary for each of the twelve months
    pub async fn get_year_summary(
        &self,
        location: &str,
        year: i32,
    ) -> Result<YearTemperatureSummary, StoreError> {
        let groups = self
            .repo
            .monthly_groups(location, YearScope::Single(year))
            .await?;

        let monthly_summaries: Vec<MonthlyTemperatureSummary> =
            groups.iter().map(Self::summarize_month).collect();

        let all: Vec<&DailyObservation> = groups.iter().flat_map(|g| &g.observations).collect();
        let stats = TemperatureStats::from_observations(all.iter().copied());

        Ok(YearTemperatureSummary {
            location: location.to_string(),
            year,
            days_recorded: all.len(),
            days_with_data: stats.days_with_data,
            average_mean: stats.average_mean(),
            highest_max: stats.highest_max,
            lowest_min: stats.lowest_min,
            monthly_summaries,
        })
    }

    fn summarize_month(group: &MonthGroup) -> MonthlyTemperatureSummary {
        let stats = TemperatureStats::from_observations(group.observations.iter());

        MonthlyTemperatureSummary {
            month: group.month,
            month_name: month_name(group.month).to_string(),
            days_recorded: group.observations.len(),
            days_with_data: stats.days_with_data,
            average_mean: stats.average_mean(),
            highest_max: stats.highest_max,
            lowest_min: stats.lowest_min,
        }
    }

    /// `Today: -5.0°C avg, 0.0° high, -10.0° low`, with a dated prefix when not today
    fn conditions_label(observation: &DailyObservation, is_today: bool) -> String {
        let prefix = if is_today {
            "Today".to_string()
        } else {
            format!("Latest ({})", observation.sample_date)
        };

        let mut parts = Vec::new();
        if let Some(mean) = observation.temp_mean {
            parts.push(format!("{mean:.1}°C avg"));
        }
        if let Some(max) = observation.temp_max {
            parts.push(format!("{max:.1}° high"));
        }
        if let Some(min) = observation.temp_min {
            parts.push(format!("{min:.1}° low"));
        }

        if parts.is_empty() {
            format!("{prefix}: no temp data")
        } else {
            format!("{prefix}: {}", parts.join(", "))
        }
    }
}

/// Aggregates over days that have data; fully absent days are ignored
#[derive(Default)]
struct TemperatureStats {
    days_with_data: usize,
    mean_sum: f64,
    mean_count: usize,
    highest_max: Option<f64>,
    lowest_min: Option<f64>,
}

impl TemperatureStats {
    fn from_observations<'a>(observations: impl Iterator<Item = &'a DailyObservation>) -> Self {
        let mut stats = Self::default();
        for observation in observations.filter(|o| o.has_data()) {
            stats.days_with_data += 1;
            if let Some(mean) = observation.mean_or_midpoint() {
                stats.mean_sum += mean;
                stats.mean_count += 1;
            }
            if let Some(max) = observation.temp_max {
                stats.highest_max = Some(stats.highest_max.map_or(max, |m| m.max(max)));
            }
            if let Some(min) = observation.temp_min {
                stats.lowest_min = Some(stats.lowest_min.map_or(min, |m| m.min(min)));
            }
        }
        stats
    }

    fn average_mean(&self) -> Option<f64> {
        (self.mean_count > 0).then(|| round_tenth(self.mean_sum / self.mean_count as f64))
    }
}

fn round_tenth(value: f64) -> f64 {
    let rounded = (value * 10.0).round() / 10.0;
    // avoid serializing -0.0
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

pub fn month_name(month: u32) -> &'static str {
    match month {
        1 => "January",
        2 => "February",
        3 => "March",
        4 => "April",
        5 => "May",
        6 => "June",
        7 => "July",
        8 => "August",
        9 => "September",
        10 => "October",
        11 => "November",
        12 => "December",
        _ => "Unknown",
    }
}
