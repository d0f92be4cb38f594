use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use sqlx::{Connection, SqliteConnection, SqlitePool};
use tracing::{debug, info, instrument, warn};

use crate::db::{DailyObservation, StoreError};

const SELECT_OBSERVATIONS: &str = r#"
    SELECT sample_date, location, temp_max, temp_min, temp_mean
    FROM daily_observations
"#;

const HAS_DATA: &str = "(temp_max IS NOT NULL OR temp_min IS NOT NULL OR temp_mean IS NOT NULL)";

/// Read queries over one location's observations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationFilter {
    ExactDate(NaiveDate),
    /// Inclusive on both ends
    DateRange { start: NaiveDate, end: NaiveDate },
    /// Most recent day with at least one reading
    LatestWithData,
    YearMonth { year: i32, month: u32 },
}

/// Which years feed a month-grouped query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YearScope {
    All,
    Single(i32),
    /// Inclusive, in either order
    Range { from: i32, to: i32 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthGroup {
    pub month: u32,
    pub observations: Vec<DailyObservation>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UpsertStats {
    pub attempted: usize,
    pub upserted: usize,
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
    pub failures: Vec<UpsertFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpsertFailure {
    pub sample_date: NaiveDate,
    pub location: String,
    pub message: String,
}

#[derive(Clone)]
pub struct ObservationRepository {
    pool: SqlitePool,
}

impl ObservationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or overwrite observations keyed by (sample_date, location)
    ///
    /// Each record commits on its own, so a failure part-way leaves earlier
    /// records stored and later ones still attempted. Duplicate keys in one
    /// batch resolve to the last occurrence. Errors only when no connection
    /// can be acquired or every record fails.
    #[instrument(skip(self, observations), fields(count = observations.len()))]
    pub async fn upsert(&self, observations: &[DailyObservation]) -> Result<UpsertStats, StoreError> {
        let mut stats = UpsertStats {
            attempted: observations.len(),
            ..Default::default()
        };
        if observations.is_empty() {
            return Ok(stats);
        }

        let mut conn = self.pool.acquire().await?;
        let mut last_error = None;

        for observation in observations {
            match Self::upsert_one(&mut conn, observation).await {
                Ok(true) => {
                    stats.upserted += 1;
                    stats.inserted += 1;
                }
                Ok(false) => {
                    stats.upserted += 1;
                    stats.updated += 1;
                }
                Err(e) => {
                    warn!(
                        "Failed to upsert {} for {}: {}",
                        observation.sample_date, observation.location, e
                    );
                    stats.failed += 1;
                    stats.failures.push(UpsertFailure {
                        sample_date: observation.sample_date,
                        location: observation.location.clone(),
                        message: e.to_string(),
                    });
                    last_error = Some(e);
                }
            }
        }

        if stats.upserted == 0 {
            if let Some(e) = last_error {
                return Err(e.into());
            }
        }

        info!(
            "Upserted {} observations ({} new, {} updated, {} failed)",
            stats.upserted, stats.inserted, stats.updated, stats.failed
        );
        Ok(stats)
    }

    /// Returns true when the key was new
    async fn upsert_one(
        conn: &mut SqliteConnection,
        observation: &DailyObservation,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = conn.begin().await?;

        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM daily_observations WHERE sample_date = ? AND location = ?",
        )
        .bind(observation.sample_date)
        .bind(&observation.location)
        .fetch_optional(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO daily_observations (sample_date, location, temp_max, temp_min, temp_mean)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (sample_date, location) DO UPDATE SET
                temp_max = excluded.temp_max,
                temp_min = excluded.temp_min,
                temp_mean = excluded.temp_mean,
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
            "#,
        )
        .bind(observation.sample_date)
        .bind(&observation.location)
        .bind(observation.temp_max)
        .bind(observation.temp_min)
        .bind(observation.temp_mean)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(existing.is_none())
    }

    /// Run a filter; no matching rows is an empty result, not an error
    pub async fn query(
        &self,
        location: &str,
        filter: &ObservationFilter,
    ) -> Result<Vec<DailyObservation>, StoreError> {
        match *filter {
            ObservationFilter::ExactDate(date) => {
                Ok(self.find_by_date(location, date).await?.into_iter().collect())
            }
            ObservationFilter::DateRange { start, end } => {
                self.find_by_date_range(location, start, end).await
            }
            ObservationFilter::LatestWithData => Ok(self
                .find_latest_with_data(location)
                .await?
                .into_iter()
                .collect()),
            ObservationFilter::YearMonth { year, month } => {
                self.find_by_year_month(location, year, month).await
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn find_by_date(
        &self,
        location: &str,
        date: NaiveDate,
    ) -> Result<Option<DailyObservation>, StoreError> {
        let sql = format!("{SELECT_OBSERVATIONS} WHERE location = ? AND sample_date = ?");
        let observation = sqlx::query_as::<_, DailyObservation>(&sql)
            .bind(location)
            .bind(date)
            .fetch_optional(&self.pool)
            .await?;

        Ok(observation)
    }

    /// Observations from `start` to `end` inclusive, oldest first
    #[instrument(skip(self))]
    pub async fn find_by_date_range(
        &self,
        location: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyObservation>, StoreError> {
        debug!("Querying observations from {} to {}", start, end);
        if start > end {
            return Ok(Vec::new());
        }

        let sql = format!(
            "{SELECT_OBSERVATIONS} WHERE location = ? AND sample_date >= ? AND sample_date <= ? ORDER BY sample_date ASC"
        );
        let observations = sqlx::query_as::<_, DailyObservation>(&sql)
            .bind(location)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?;

        debug!("Found {} observations", observations.len());
        Ok(observations)
    }

    #[instrument(skip(self))]
    pub async fn find_by_year_month(
        &self,
        location: &str,
        year: i32,
        month: u32,
    ) -> Result<Vec<DailyObservation>, StoreError> {
        match month_bounds(year, month) {
            Some((start, end)) => self.find_by_date_range(location, start, end).await,
            None => {
                debug!("{}-{} is not a calendar month", year, month);
                Ok(Vec::new())
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn find_all(&self, location: &str) -> Result<Vec<DailyObservation>, StoreError> {
        let sql = format!("{SELECT_OBSERVATIONS} WHERE location = ? ORDER BY sample_date ASC");
        let observations = sqlx::query_as::<_, DailyObservation>(&sql)
            .bind(location)
            .fetch_all(&self.pool)
            .await?;

        Ok(observations)
    }

    /// Most recent observation with at least one reading present
    #[instrument(skip(self))]
    pub async fn find_latest_with_data(
        &self,
        location: &str,
    ) -> Result<Option<DailyObservation>, StoreError> {
        let sql = format!(
            "{SELECT_OBSERVATIONS} WHERE location = ? AND {HAS_DATA} ORDER BY sample_date DESC LIMIT 1"
        );
        let observation = sqlx::query_as::<_, DailyObservation>(&sql)
            .bind(location)
            .fetch_optional(&self.pool)
            .await?;

        if observation.is_none() {
            debug!("No observations with data for {}", location);
        }
        Ok(observation)
    }

    /// Like `find_latest_with_data`, ignoring anything after `date`
    #[instrument(skip(self))]
    pub async fn find_latest_with_data_on_or_before(
        &self,
        location: &str,
        date: NaiveDate,
    ) -> Result<Option<DailyObservation>, StoreError> {
        let sql = format!(
            "{SELECT_OBSERVATIONS} WHERE location = ? AND sample_date <= ? AND {HAS_DATA} ORDER BY sample_date DESC LIMIT 1"
        );
        let observation = sqlx::query_as::<_, DailyObservation>(&sql)
            .bind(location)
            .bind(date)
            .fetch_optional(&self.pool)
            .await?;

        Ok(observation)
    }

    /// Observations grouped by calendar month; always twelve groups, January first
    #[instrument(skip(self))]
    pub async fn monthly_groups(
        &self,
        location: &str,
        scope: YearScope,
    ) -> Result<Vec<MonthGroup>, StoreError> {
        let observations = match scope {
            YearScope::All => self.find_all(location).await?,
            YearScope::Single(year) => self.find_by_years(location, year, year).await?,
            YearScope::Range { from, to } => {
                self.find_by_years(location, from.min(to), from.max(to))
                    .await?
            }
        };

        Ok(group_by_month(observations))
    }

    async fn find_by_years(
        &self,
        location: &str,
        from: i32,
        to: i32,
    ) -> Result<Vec<DailyObservation>, StoreError> {
        match (
            NaiveDate::from_ymd_opt(from, 1, 1),
            NaiveDate::from_ymd_opt(to, 12, 31),
        ) {
            (Some(start), Some(end)) => self.find_by_date_range(location, start, end).await,
            _ => Ok(Vec::new()),
        }
    }

    /// Years with at least one row, newest first
    #[instrument(skip(self))]
    pub async fn available_years(&self, location: &str) -> Result<Vec<i32>, StoreError> {
        let years: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT CAST(substr(sample_date, 1, 4) AS INTEGER) AS year
            FROM daily_observations
            WHERE location = ?
            ORDER BY year DESC
            "#,
        )
        .bind(location)
        .fetch_all(&self.pool)
        .await?;

        Ok(years.into_iter().map(|y| y as i32).collect())
    }

    #[instrument(skip(self))]
    pub async fn latest_date(&self, location: &str) -> Result<Option<NaiveDate>, StoreError> {
        let date: Option<NaiveDate> = sqlx::query_scalar(
            "SELECT sample_date FROM daily_observations WHERE location = ? ORDER BY sample_date DESC LIMIT 1",
        )
        .bind(location)
        .fetch_optional(&self.pool)
        .await?;

        Ok(date)
    }

    pub async fn count(&self, location: &str) -> Result<usize, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM daily_observations WHERE location = ?")
                .bind(location)
                .fetch_one(&self.pool)
                .await?;

        Ok(count as usize)
    }

    /// Remove every row for a location. Administrative only; ingestion never deletes.
    #[instrument(skip(self))]
    pub async fn delete_location(&self, location: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM daily_observations WHERE location = ?")
            .bind(location)
            .execute(&self.pool)
            .await?;

        info!("Deleted {} observations for {}", result.rows_affected(), location);
        Ok(result.rows_affected())
    }
}

/// First and last day of a calendar month
pub fn month_bounds(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let start = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((start, next.pred_opt()?))
}

/// Split observations into twelve month buckets, preserving order within each
pub fn group_by_month(observations: Vec<DailyObservation>) -> Vec<MonthGroup> {
    let mut groups: Vec<MonthGroup> = (1..=12)
        .map(|month| MonthGroup {
            month,
            observations: Vec::new(),
        })
        .collect();

    for observation in observations {
        let index = observation.sample_date.month0() as usize;
        groups[index].observations.push(observation);
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(y: i32, m: u32, d: u32) -> DailyObservation {
        DailyObservation {
            sample_date: NaiveDate::from_ymd_opt(y, m, d).unwrap(),
            location: "Winnipeg".to_string(),
            temp_max: None,
            temp_min: None,
            temp_mean: Some(1.0),
        }
    }

    #[test]
    fn test_month_bounds() {
        let (start, end) = month_bounds(2024, 2).unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());

        let (_, end) = month_bounds(2023, 12).unwrap();
        assert_eq!(end, NaiveDate::from_ymd_opt(2023, 12, 31).unwrap());

        assert!(month_bounds(2024, 0).is_none());
        assert!(month_bounds(2024, 13).is_none());
    }

    #[test]
    fn test_group_by_month_always_has_twelve_groups() {
        let groups = group_by_month(vec![
            observation(2024, 2, 1),
            observation(2023, 2, 3),
            observation(2024, 7, 4),
        ]);

        assert_eq!(groups.len(), 12);
        assert_eq!(groups[0].month, 1);
        assert_eq!(groups[11].month, 12);
        assert_eq!(groups[1].observations.len(), 2);
        assert_eq!(groups[6].observations.len(), 1);

        let non_empty = groups.iter().filter(|g| !g.observations.is_empty()).count();
        assert_eq!(non_empty, 2);
    }

    #[test]
    fn test_group_by_month_empty_input() {
        let groups = group_by_month(Vec::new());
        assert_eq!(groups.len(), 12);
        assert!(groups.iter().all(|g| g.observations.is_empty()));
    }
}
