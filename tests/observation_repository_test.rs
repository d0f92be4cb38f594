// Store tests against in-memory SQLite (one connection per test database)

mod common;

use std::time::Duration;

use common::{date, observation, test_repo, LOCATION};
use weather_tracker_service::db::{
    DailyObservation, DbPool, ObservationFilter, ObservationRepository, YearScope,
};

mod fixtures {
    use super::*;

    /// Two February days (different years), one July day, and a trailing day with no data
    pub fn seasonal_observations() -> Vec<DailyObservation> {
        vec![
            observation(date(2023, 2, 10), Some(-8.0), Some(-20.0), Some(-14.0)),
            observation(date(2024, 2, 1), Some(-3.0), Some(-15.0), Some(-9.0)),
            observation(date(2024, 7, 4), Some(30.0), Some(18.0), Some(24.0)),
            observation(date(2024, 7, 5), None, None, None),
        ]
    }
}

#[tokio::test]
async fn test_upsert_same_key_twice_keeps_second_value() {
    let repo = test_repo().await;
    let day = date(2024, 1, 1);

    let first = repo
        .upsert(&[observation(day, Some(1.0), Some(-1.0), Some(0.0))])
        .await
        .unwrap();
    assert_eq!(first.inserted, 1);
    assert_eq!(first.updated, 0);

    let second = repo
        .upsert(&[observation(day, Some(2.0), None, Some(0.5))])
        .await
        .unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 1);
    assert_eq!(second.upserted, 1);

    assert_eq!(repo.count(LOCATION).await.unwrap(), 1);
    let stored = repo.find_by_date(LOCATION, day).await.unwrap().unwrap();
    assert_eq!(stored.temp_max, Some(2.0));
    assert_eq!(stored.temp_min, None);
    assert_eq!(stored.temp_mean, Some(0.5));
}

#[tokio::test]
async fn test_duplicate_keys_in_one_batch_last_wins() {
    let repo = test_repo().await;
    let day = date(2024, 3, 1);

    let stats = repo
        .upsert(&[
            observation(day, Some(1.0), None, None),
            observation(day, Some(5.0), None, None),
        ])
        .await
        .unwrap();

    assert_eq!(stats.attempted, 2);
    assert_eq!(stats.inserted, 1);
    assert_eq!(stats.updated, 1);
    assert_eq!(repo.count(LOCATION).await.unwrap(), 1);

    let stored = repo.find_by_date(LOCATION, day).await.unwrap().unwrap();
    assert_eq!(stored.temp_max, Some(5.0));
}

#[tokio::test]
async fn test_upsert_empty_batch() {
    let repo = test_repo().await;
    let stats = repo.upsert(&[]).await.unwrap();
    assert_eq!(stats.attempted, 0);
    assert_eq!(stats.upserted, 0);
}

#[tokio::test]
async fn test_same_date_different_locations_are_distinct() {
    let repo = test_repo().await;
    let day = date(2024, 1, 1);
    let mut brandon = observation(day, Some(3.0), None, None);
    brandon.location = "Brandon".to_string();

    repo.upsert(&[observation(day, Some(1.0), None, None), brandon])
        .await
        .unwrap();

    assert_eq!(repo.count(LOCATION).await.unwrap(), 1);
    assert_eq!(repo.count("Brandon").await.unwrap(), 1);
    let stored = repo.find_by_date("Brandon", day).await.unwrap().unwrap();
    assert_eq!(stored.temp_max, Some(3.0));
}

#[tokio::test]
async fn test_all_absent_row_is_stored() {
    let repo = test_repo().await;
    let day = date(2024, 1, 9);

    repo.upsert(&[observation(day, None, None, None)]).await.unwrap();

    let stored = repo.find_by_date(LOCATION, day).await.unwrap().unwrap();
    assert!(!stored.has_data());
}

#[tokio::test]
async fn test_latest_with_data_skips_empty_days() {
    let repo = test_repo().await;
    repo.upsert(&fixtures::seasonal_observations()).await.unwrap();

    let latest = repo
        .query(LOCATION, &ObservationFilter::LatestWithData)
        .await
        .unwrap();

    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].sample_date, date(2024, 7, 4));

    assert_eq!(
        repo.latest_date(LOCATION).await.unwrap(),
        Some(date(2024, 7, 5))
    );
}

#[tokio::test]
async fn test_latest_with_data_on_empty_store() {
    let repo = test_repo().await;

    let latest = repo
        .query(LOCATION, &ObservationFilter::LatestWithData)
        .await
        .unwrap();
    assert!(latest.is_empty());
    assert!(repo.find_latest_with_data(LOCATION).await.unwrap().is_none());
    assert!(repo.latest_date(LOCATION).await.unwrap().is_none());
}

#[tokio::test]
async fn test_latest_with_data_on_or_before() {
    let repo = test_repo().await;
    repo.upsert(&fixtures::seasonal_observations()).await.unwrap();

    let found = repo
        .find_latest_with_data_on_or_before(LOCATION, date(2024, 6, 30))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.sample_date, date(2024, 2, 1));

    let none = repo
        .find_latest_with_data_on_or_before(LOCATION, date(2020, 1, 1))
        .await
        .unwrap();
    assert!(none.is_none());
}

#[tokio::test]
async fn test_date_range_is_inclusive_and_ascending() {
    let repo = test_repo().await;
    let days: Vec<_> = (1..=10)
        .rev()
        .map(|d| observation(date(2024, 1, d), None, None, Some(d as f64)))
        .collect();
    repo.upsert(&days).await.unwrap();

    let found = repo
        .query(
            LOCATION,
            &ObservationFilter::DateRange {
                start: date(2024, 1, 3),
                end: date(2024, 1, 6),
            },
        )
        .await
        .unwrap();

    let dates: Vec<_> = found.iter().map(|o| o.sample_date).collect();
    assert_eq!(
        dates,
        vec![date(2024, 1, 3), date(2024, 1, 4), date(2024, 1, 5), date(2024, 1, 6)]
    );
}

#[tokio::test]
async fn test_date_range_reversed_is_empty() {
    let repo = test_repo().await;
    repo.upsert(&[observation(date(2024, 1, 5), None, None, Some(1.0))])
        .await
        .unwrap();

    let found = repo
        .find_by_date_range(LOCATION, date(2024, 1, 31), date(2024, 1, 1))
        .await
        .unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
async fn test_exact_date_and_year_month_filters() {
    let repo = test_repo().await;
    repo.upsert(&fixtures::seasonal_observations()).await.unwrap();

    let exact = repo
        .query(LOCATION, &ObservationFilter::ExactDate(date(2024, 2, 1)))
        .await
        .unwrap();
    assert_eq!(exact.len(), 1);
    assert_eq!(exact[0].temp_mean, Some(-9.0));

    let missing = repo
        .query(LOCATION, &ObservationFilter::ExactDate(date(2024, 2, 2)))
        .await
        .unwrap();
    assert!(missing.is_empty());

    let july = repo
        .query(LOCATION, &ObservationFilter::YearMonth { year: 2024, month: 7 })
        .await
        .unwrap();
    assert_eq!(july.len(), 2);

    let invalid = repo
        .query(LOCATION, &ObservationFilter::YearMonth { year: 2024, month: 13 })
        .await
        .unwrap();
    assert!(invalid.is_empty());
}

#[tokio::test]
async fn test_monthly_groups_february_and_july() {
    let repo = test_repo().await;
    repo.upsert(&fixtures::seasonal_observations()).await.unwrap();

    let groups = repo.monthly_groups(LOCATION, YearScope::All).await.unwrap();

    assert_eq!(groups.len(), 12);
    let non_empty: Vec<u32> = groups
        .iter()
        .filter(|g| !g.observations.is_empty())
        .map(|g| g.month)
        .collect();
    assert_eq!(non_empty, vec![2, 7]);
    assert_eq!(groups[1].observations.len(), 2);
}

#[tokio::test]
async fn test_monthly_groups_year_scope() {
    let repo = test_repo().await;
    repo.upsert(&fixtures::seasonal_observations()).await.unwrap();

    let single = repo
        .monthly_groups(LOCATION, YearScope::Single(2023))
        .await
        .unwrap();
    assert_eq!(single[1].observations.len(), 1);
    assert!(single[6].observations.is_empty());

    let range = repo
        .monthly_groups(LOCATION, YearScope::Range { from: 2024, to: 2023 })
        .await
        .unwrap();
    let total: usize = range.iter().map(|g| g.observations.len()).sum();
    assert_eq!(total, 4);
}

#[tokio::test]
async fn test_available_years_newest_first() {
    let repo = test_repo().await;
    repo.upsert(&fixtures::seasonal_observations()).await.unwrap();

    assert_eq!(repo.available_years(LOCATION).await.unwrap(), vec![2024, 2023]);
    assert!(repo.available_years("Nowhere").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_location() {
    let repo = test_repo().await;
    repo.upsert(&fixtures::seasonal_observations()).await.unwrap();

    let deleted = repo.delete_location(LOCATION).await.unwrap();
    assert_eq!(deleted, 4);
    assert_eq!(repo.count(LOCATION).await.unwrap(), 0);
}

#[tokio::test]
async fn test_reads_continue_during_writes_on_file_database() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("weather.sqlite3").display());

    let db = DbPool::connect(&url, Duration::from_secs(5)).await.unwrap();
    let writer = ObservationRepository::new(db.pool().clone());
    let reader = writer.clone();

    writer
        .upsert(&[observation(date(2023, 12, 31), None, None, Some(-20.0))])
        .await
        .unwrap();

    let write_task = tokio::spawn(async move {
        for day in 1..=31 {
            let obs = observation(date(2024, 1, day), None, None, Some(day as f64));
            writer.upsert(&[obs]).await.unwrap();
        }
    });

    for _ in 0..20 {
        let count = reader.count(LOCATION).await.unwrap();
        assert!((1..=32).contains(&count));
        tokio::task::yield_now().await;
    }

    write_task.await.unwrap();
    assert_eq!(reader.count(LOCATION).await.unwrap(), 32);
}
