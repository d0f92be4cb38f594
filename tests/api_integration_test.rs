// API integration tests that verify HTTP endpoints
// Tests actual Axum router against an in-memory database

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt; // For `.collect()`
use mockito::{Server, ServerGuard};
use serde_json::Value;
use tower::ServiceExt; // For `oneshot`
use weather_tracker_service::api::{create_router, AppState};
use weather_tracker_service::db::ObservationRepository;
use weather_tracker_service::services::{ChartService, ObservationService};

use common::{date, feed_payload, ingest_service, month_query, observation, test_repo, FEED_PATH, LOCATION, STATION};

/// Test fixture module for API tests
mod api_test_fixtures {
    use super::*;

    pub const EMPTY_LOCATION: &str = "Nowhere";

    /// Two weeks of January 2024 plus one July 2023 day
    pub async fn seed(repo: &ObservationRepository) {
        let mut observations: Vec<_> = (1..=14)
            .map(|d| {
                observation(
                    date(2024, 1, d),
                    Some(d as f64 - 5.0),
                    Some(d as f64 - 20.0),
                    Some(d as f64 - 12.0),
                )
            })
            .collect();
        observations.push(observation(date(2023, 7, 1), Some(28.0), Some(15.0), None));

        repo.upsert(&observations).await.expect("Failed to seed observations");
    }
}

/// Helper to create test app with a seeded database
async fn create_test_app(server: &ServerGuard) -> (axum::Router, ObservationRepository) {
    let repo = test_repo().await;
    api_test_fixtures::seed(&repo).await;

    let state = AppState {
        observation_service: ObservationService::new(repo.clone()),
        chart_service: ChartService::new(repo.clone()),
        ingest_service: ingest_service(server, &repo),
        station_id: STATION.to_string(),
        location: LOCATION.to_string(),
    };

    (create_router(state), repo)
}

async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, Option<Value>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).ok())
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = Server::new_async().await;
    let (app, _repo) = create_test_app(&server).await;

    let (status, json) = get_json(app, "/api/v1/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.unwrap()["status"], "healthy");
}

#[tokio::test]
async fn test_observations_in_range() {
    let server = Server::new_async().await;
    let (app, _repo) = create_test_app(&server).await;

    let (status, json) = get_json(
        app,
        &format!("/api/v1/observations/{LOCATION}?start=2024-01-03&end=2024-01-05"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let rows = json.unwrap();
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["sample_date"], "2024-01-03");
    assert_eq!(rows[2]["sample_date"], "2024-01-05");
}

#[tokio::test]
async fn test_observations_require_range_params() {
    let server = Server::new_async().await;
    let (app, _repo) = create_test_app(&server).await;

    let (status, _) = get_json(app, &format!("/api/v1/observations/{LOCATION}?start=2024-01-03")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_observation_by_date() {
    let server = Server::new_async().await;
    let (app, _repo) = create_test_app(&server).await;

    let (status, json) = get_json(app.clone(), &format!("/api/v1/observations/{LOCATION}/date/2023-07-01")).await;
    assert_eq!(status, StatusCode::OK);
    let json = json.unwrap();
    assert_eq!(json["temp_max"], 28.0);
    assert!(json["temp_mean"].is_null());

    let (status, _) = get_json(app, &format!("/api/v1/observations/{LOCATION}/date/2020-01-01")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_current_conditions_falls_back_to_latest() {
    let server = Server::new_async().await;
    let (app, _repo) = create_test_app(&server).await;

    let (status, json) = get_json(app, &format!("/api/v1/observations/{LOCATION}/current")).await;

    assert_eq!(status, StatusCode::OK);
    let json = json.unwrap();
    assert_eq!(json["is_today"], false);
    assert_eq!(json["observation"]["sample_date"], "2024-01-14");
    assert_eq!(json["label"], "Latest (2024-01-14): 2.0°C avg, 9.0° high, -6.0° low");
}

#[tokio::test]
async fn test_current_conditions_not_found() {
    let server = Server::new_async().await;
    let (app, _repo) = create_test_app(&server).await;

    let (status, _) = get_json(
        app,
        &format!("/api/v1/observations/{}/current", api_test_fixtures::EMPTY_LOCATION),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_available_years() {
    let server = Server::new_async().await;
    let (app, _repo) = create_test_app(&server).await;

    let (status, json) = get_json(app, &format!("/api/v1/observations/{LOCATION}/years")).await;

    assert_eq!(status, StatusCode::OK);
    let json = json.unwrap();
    assert_eq!(json["location"], LOCATION);
    assert_eq!(json["years"], serde_json::json!([2024, 2023]));
}

#[tokio::test]
async fn test_line_chart() {
    let server = Server::new_async().await;
    let (app, _repo) = create_test_app(&server).await;

    let (status, json) = get_json(app.clone(), &format!("/api/v1/charts/{LOCATION}/line/2024/1")).await;
    assert_eq!(status, StatusCode::OK);
    let json = json.unwrap();
    let points = json["points"].as_array().unwrap();
    assert_eq!(points.len(), 14);
    assert_eq!(points[0]["day"], 1);
    assert_eq!(points[0]["value"], -11.0);

    let (status, _) = get_json(app, &format!("/api/v1/charts/{LOCATION}/line/2024/13")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_monthly_chart() {
    let server = Server::new_async().await;
    let (app, _repo) = create_test_app(&server).await;

    let (status, json) = get_json(app.clone(), &format!("/api/v1/charts/{LOCATION}/monthly")).await;
    assert_eq!(status, StatusCode::OK);
    let json = json.unwrap();
    let months = json["months"].as_array().unwrap();
    assert_eq!(months.len(), 12);
    assert_eq!(months[0]["values"].as_array().unwrap().len(), 14);
    // July 2023 has no mean but a min/max pair: midpoint 21.5
    assert_eq!(months[6]["values"], serde_json::json!([21.5]));
    assert!(months[1]["stats"].is_null());

    let (_, json) = get_json(app, &format!("/api/v1/charts/{LOCATION}/monthly?from_year=2024")).await;
    let months = json.unwrap()["months"].as_array().unwrap().clone();
    assert!(months[6]["values"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_year_summary() {
    let server = Server::new_async().await;
    let (app, _repo) = create_test_app(&server).await;

    let (status, json) = get_json(app, &format!("/api/v1/summary/{LOCATION}/2024")).await;

    assert_eq!(status, StatusCode::OK);
    let json = json.unwrap();
    assert_eq!(json["year"], 2024);
    assert_eq!(json["days_recorded"], 14);
    assert_eq!(json["highest_max"], 9.0);
    assert_eq!(json["lowest_min"], -19.0);
    let monthly = json["monthly_summaries"].as_array().unwrap();
    assert_eq!(monthly.len(), 12);
    assert_eq!(monthly[0]["month_name"], "January");
    assert_eq!(monthly[0]["days_with_data"], 14);
    assert_eq!(monthly[1]["days_recorded"], 0);
}

#[tokio::test]
async fn test_post_ingest() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", FEED_PATH)
        .match_query(month_query(2024, 2))
        .with_status(200)
        .with_body(feed_payload(&[
            ("2024-02-01", "-2.0", "-12.0", "-7.0"),
            ("2024-02-02", "", "", ""),
        ]))
        .create_async()
        .await;
    let (app, repo) = create_test_app(&server).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/ingest")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"start_date":"2024-02-01","end_date":"2024-02-29"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["rows_upserted"], 2);
    assert_eq!(json["requested_range"]["start"], "2024-02-01");

    assert!(repo.find_by_date(LOCATION, date(2024, 2, 2)).await.unwrap().is_some());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_post_ingest_rejects_reversed_range() {
    let server = Server::new_async().await;
    let (app, _repo) = create_test_app(&server).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/ingest")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"start_date":"2024-03-01","end_date":"2024-02-01"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_post_ingest_rejects_future_range() {
    let mut server = Server::new_async().await;
    let feed = server
        .mock("GET", FEED_PATH)
        .match_query(mockito::Matcher::Any)
        .expect(0)
        .create_async()
        .await;
    let (app, _repo) = create_test_app(&server).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/ingest")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"start_date":"2099-01-01","end_date":"2099-01-31"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    feed.assert_async().await;
}
