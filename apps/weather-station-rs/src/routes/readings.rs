use axum::extract::{DefaultBodyLimit, RawQuery, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use url::form_urlencoded;

use crate::error::{internal_error, map_db_error, AppError, AppResult};
use crate::services::readings::{NewReading, ReadingSource, ReadingWindow};
use crate::services::{sampler, series_encoder};
use crate::state::AppState;

const MAX_INGEST_ITEMS: usize = 50_000;
// A full-precision item with an RFC3339 timestamp is under 128 bytes.
const MAX_INGEST_BODY_BYTES: usize = MAX_INGEST_ITEMS * 256;

/// Resolved `hours` / `maxpts` parameters.
///
/// Anything missing, unparsable or non-positive falls back to the defaults:
/// an unbounded window and the configured point cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SeriesQuery {
    pub window: ReadingWindow,
    pub max_points: usize,
}

impl SeriesQuery {
    pub(crate) fn from_raw(raw: Option<&str>, default_max_points: u32) -> Self {
        let mut hours: Option<i64> = None;
        let mut max_points: Option<i64> = None;

        if let Some(raw) = raw {
            for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
                match key.as_ref() {
                    "hours" => hours = parse_whole(&value),
                    "maxpts" => max_points = parse_whole(&value),
                    _ => {}
                }
            }
        }

        let max_points = match max_points {
            Some(value) if value > 0 => usize::try_from(value).unwrap_or(usize::MAX),
            _ => default_max_points.max(1) as usize,
        };

        Self {
            window: ReadingWindow::from_hours(hours.unwrap_or(0)),
            max_points,
        }
    }
}

/// Integer value of a query parameter; decimals are truncated toward zero.
fn parse_whole(value: &str) -> Option<i64> {
    let value = value.trim();
    value.parse::<i64>().ok().or_else(|| {
        value
            .parse::<f64>()
            .ok()
            .filter(|parsed| parsed.is_finite())
            .map(|parsed| parsed.trunc() as i64)
    })
}

/// Shape of the series body, for the OpenAPI document only; the handler
/// streams it through `series_encoder`.
#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct SeriesResponse {
    pub dateandtime: Vec<i64>,
    /// `null` where the stored value is not finite.
    pub temperature: Vec<Option<f64>>,
    pub humidity: Vec<Option<f64>>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, utoipa::ToSchema)]
pub(crate) struct LatestReadingResponse {
    pub dateandtime: i64,
    pub temperature: f64,
    pub humidity: f64,
}

#[derive(Debug, Clone, serde::Deserialize, utoipa::ToSchema)]
pub(crate) struct ReadingIngestItem {
    temperature: f64,
    humidity: f64,
    /// RFC3339; defaults to the time the request is received.
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize, utoipa::ToSchema)]
pub(crate) struct ReadingIngestRequest {
    items: Vec<ReadingIngestItem>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, utoipa::ToSchema)]
pub(crate) struct ReadingIngestResponse {
    pub ingested: u64,
}

#[utoipa::path(
    get,
    path = "/api/readings/series",
    tag = "readings",
    params(
        ("hours" = Option<i64>, Query, description = "Only readings from the last N hours; 0 or absent returns everything"),
        ("maxpts" = Option<i64>, Query, description = "Upper bound on returned points; absent or <= 0 uses the configured default (2000)")
    ),
    responses(
        (status = 200, description = "Downsampled series as parallel arrays", body = SeriesResponse),
        (status = 503, description = "Database unavailable"),
        (status = 504, description = "Timed out fetching readings")
    )
)]
pub(crate) async fn series(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> Result<Response, (StatusCode, String)> {
    let query = SeriesQuery::from_raw(raw.as_deref(), state.config.default_max_points);

    let fetched = tokio::time::timeout(
        state.config.fetch_timeout(),
        state.readings.fetch_readings(query.window),
    )
    .await;
    let readings = match fetched {
        Ok(result) => result.map_err(map_db_error)?,
        Err(_) => {
            tracing::warn!(
                window = ?query.window,
                timeout_seconds = state.config.fetch_timeout_seconds,
                "reading fetch timed out"
            );
            return Err((
                StatusCode::GATEWAY_TIMEOUT,
                "Timed out fetching readings".to_string(),
            ));
        }
    };

    let total = readings.len();
    let sampled = sampler::sample(readings, query.max_points).map_err(internal_error)?;
    tracing::debug!(
        window = ?query.window,
        total,
        max_points = query.max_points,
        returned = sampled.len(),
        "sampled readings"
    );

    let body = series_encoder::encode(&sampled).map_err(internal_error)?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

#[utoipa::path(
    get,
    path = "/api/readings/latest",
    tag = "readings",
    responses(
        (status = 200, description = "Most recent reading", body = LatestReadingResponse),
        (status = 404, description = "No readings stored")
    )
)]
pub(crate) async fn latest(
    State(readings): State<Arc<dyn ReadingSource>>,
) -> Result<Json<LatestReadingResponse>, (StatusCode, String)> {
    let reading = readings
        .latest_reading()
        .await
        .map_err(map_db_error)?
        .ok_or_else(|| {
            let err = AppError::not_found("No readings stored");
            (err.status, err.message)
        })?;
    Ok(Json(LatestReadingResponse {
        dateandtime: reading.timestamp,
        temperature: reading.temperature,
        humidity: reading.humidity,
    }))
}

#[utoipa::path(
    post,
    path = "/api/readings",
    tag = "readings",
    request_body = ReadingIngestRequest,
    responses(
        (status = 200, description = "Readings stored", body = ReadingIngestResponse),
        (status = 400, description = "Invalid request")
    )
)]
pub(crate) async fn ingest(
    State(state): State<AppState>,
    Json(payload): Json<ReadingIngestRequest>,
) -> Result<Json<ReadingIngestResponse>, (StatusCode, String)> {
    let readings =
        validate_ingest(payload.items, Utc::now()).map_err(|err| (err.status, err.message))?;
    let ingested = state
        .readings
        .insert_readings(&readings)
        .await
        .map_err(map_db_error)?;
    tracing::info!(ingested, "stored sensor readings");
    Ok(Json(ReadingIngestResponse { ingested }))
}

fn validate_ingest(
    items: Vec<ReadingIngestItem>,
    now: DateTime<Utc>,
) -> AppResult<Vec<NewReading>> {
    if items.is_empty() {
        return Err(AppError::bad_request("items must not be empty"));
    }
    if items.len() > MAX_INGEST_ITEMS {
        return Err(AppError::bad_request(format!(
            "Too many items (max {MAX_INGEST_ITEMS})"
        )));
    }

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            if !item.temperature.is_finite() || !item.humidity.is_finite() {
                return Err(AppError::bad_request(format!(
                    "items[{index}]: temperature and humidity must be finite"
                )));
            }
            if !(0.0..=100.0).contains(&item.humidity) {
                return Err(AppError::bad_request(format!(
                    "items[{index}]: humidity must be within 0-100"
                )));
            }
            let timestamp = match item.timestamp.as_deref().map(str::trim) {
                None | Some("") => now,
                Some(raw) => DateTime::parse_from_rfc3339(raw)
                    .map(|parsed| parsed.with_timezone(&Utc))
                    .map_err(|_| {
                        AppError::bad_request(format!("items[{index}]: invalid timestamp"))
                    })?,
            };
            Ok(NewReading {
                timestamp,
                temperature: item.temperature,
                humidity: item.humidity,
            })
        })
        .collect()
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/readings",
            post(ingest).layer(DefaultBodyLimit::max(MAX_INGEST_BODY_BYTES)),
        )
        .route("/readings/series", get(series))
        .route("/readings/latest", get(latest))
}

/// Path served to clients that predate the `/api` prefix.
pub fn legacy_router() -> Router<AppState> {
    Router::new().route("/indexjson.php", get(series))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::readings::Reading;
    use crate::test_support::{five_readings, test_state, MemoryReadingStore};
    use axum::body::Body;
    use axum::http::Request;
    use chrono::TimeZone;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn get_body(app: Router, uri: &str) -> (StatusCode, Option<String>, String) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, content_type, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[test]
    fn absent_parameters_use_defaults() {
        let query = SeriesQuery::from_raw(None, 2000);
        assert_eq!(query.window, ReadingWindow::Unbounded);
        assert_eq!(query.max_points, 2000);
    }

    #[test]
    fn non_positive_maxpts_falls_back_to_default() {
        for raw in ["maxpts=0", "maxpts=-7", "maxpts=", "maxpts=lots"] {
            let query = SeriesQuery::from_raw(Some(raw), 2000);
            assert_eq!(query.max_points, 2000, "{raw}");
        }
    }

    #[test]
    fn explicit_parameters_are_honoured() {
        let query = SeriesQuery::from_raw(Some("hours=24&maxpts=150&extra=1"), 2000);
        assert_eq!(query.window, ReadingWindow::LastHours(24));
        assert_eq!(query.max_points, 150);
    }

    #[test]
    fn zero_or_garbage_hours_is_unbounded() {
        for raw in ["hours=0", "hours=-3", "hours=abc", "hours=0.5", "hours=NaN", ""] {
            let query = SeriesQuery::from_raw(Some(raw), 2000);
            assert_eq!(query.window, ReadingWindow::Unbounded, "{raw}");
        }
    }

    #[test]
    fn decimal_parameters_are_truncated() {
        let query = SeriesQuery::from_raw(Some("hours=5.5&maxpts=1.5"), 2000);
        assert_eq!(query.window, ReadingWindow::LastHours(5));
        assert_eq!(query.max_points, 1);

        let query = SeriesQuery::from_raw(Some("maxpts=0.9"), 2000);
        assert_eq!(query.max_points, 2000);
        let query = SeriesQuery::from_raw(Some("maxpts=inf"), 2000);
        assert_eq!(query.max_points, 2000);
    }

    #[test]
    fn ingest_rejects_bad_items() {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
        let item = |temperature: f64, humidity: f64, timestamp: Option<&str>| ReadingIngestItem {
            temperature,
            humidity,
            timestamp: timestamp.map(str::to_string),
        };

        assert!(validate_ingest(vec![], now).is_err());
        assert!(validate_ingest(vec![item(f64::NAN, 40.0, None)], now).is_err());
        assert!(validate_ingest(vec![item(20.0, 140.0, None)], now).is_err());
        let err = validate_ingest(vec![item(20.0, 40.0, Some("yesterday"))], now).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("items[0]"));
    }

    fn ingest_item(temperature: f64, humidity: f64) -> ReadingIngestItem {
        ReadingIngestItem {
            temperature,
            humidity,
            timestamp: None,
        }
    }

    #[test]
    fn ingest_item_cap_is_enforced() {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
        let at_cap = vec![ingest_item(20.0, 40.0); MAX_INGEST_ITEMS];
        assert_eq!(validate_ingest(at_cap, now).unwrap().len(), MAX_INGEST_ITEMS);

        let over_cap = vec![ingest_item(20.0, 40.0); MAX_INGEST_ITEMS + 1];
        let err = validate_ingest(over_cap, now).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("Too many items"));
    }

    fn ingest_body(count: usize) -> String {
        let item = r#"{"temperature":-12.3456789,"humidity":45.123456789,"timestamp":"2026-06-01T08:00:00.123456+02:00"}"#;
        format!(r#"{{"items":[{}]}}"#, vec![item; count].join(","))
    }

    async fn post_ingest(app: Router, body: String) -> StatusCode {
        app.oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/readings")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap()
        .status()
    }

    #[tokio::test]
    async fn full_batch_fits_under_body_limit() {
        let store = Arc::new(MemoryReadingStore::new(Vec::new()));
        let app = crate::routes::router(test_state(store.clone()));
        let status = post_ingest(app, ingest_body(MAX_INGEST_ITEMS)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(store.stored().len(), MAX_INGEST_ITEMS);
    }

    #[tokio::test]
    async fn oversized_batch_is_a_bad_request() {
        let store = Arc::new(MemoryReadingStore::new(Vec::new()));
        let app = crate::routes::router(test_state(store.clone()));
        let status = post_ingest(app, ingest_body(MAX_INGEST_ITEMS + 1)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(store.stored().is_empty());
    }

    #[test]
    fn ingest_defaults_timestamp_to_now() {
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
        let readings = validate_ingest(
            vec![
                ReadingIngestItem {
                    temperature: -2.5,
                    humidity: 88.0,
                    timestamp: None,
                },
                ReadingIngestItem {
                    temperature: 3.0,
                    humidity: 70.0,
                    timestamp: Some("2026-06-01T10:00:00+02:00".to_string()),
                },
            ],
            now,
        )
        .unwrap();
        assert_eq!(readings[0].timestamp, now);
        assert_eq!(
            readings[1].timestamp,
            Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn empty_table_returns_empty_arrays() {
        let store = Arc::new(MemoryReadingStore::new(Vec::new()));
        let app = crate::routes::router(test_state(store));
        let (status, content_type, body) = get_body(app, "/api/readings/series").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("application/json"));
        assert_eq!(body, r#"{"dateandtime":[],"temperature":[],"humidity":[]}"#);
    }

    #[tokio::test]
    async fn series_is_sampled_with_requested_cap() {
        let store = Arc::new(MemoryReadingStore::new(five_readings()));
        let app = crate::routes::router(test_state(store));
        let (status, _, body) = get_body(app, "/api/readings/series?maxpts=2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            r#"{"dateandtime":[100,400],"temperature":[10.0,13.0],"humidity":[50.0,53.0]}"#
        );
    }

    #[tokio::test]
    async fn legacy_path_serves_the_same_document() {
        let store = Arc::new(MemoryReadingStore::new(five_readings()));
        let app = crate::routes::router(test_state(store.clone()));
        let (status, _, body) = get_body(app, "/indexjson.php?hours=0&maxpts=5").await;
        assert_eq!(status, StatusCode::OK);
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(
            parsed["dateandtime"],
            serde_json::json!([100, 200, 300, 400, 500])
        );
        assert_eq!(store.windows(), vec![ReadingWindow::Unbounded]);
    }

    #[tokio::test]
    async fn hours_parameter_reaches_the_store() {
        let now = Utc::now().timestamp();
        let store = Arc::new(MemoryReadingStore::new(vec![
            Reading {
                timestamp: now - 30 * 3600,
                temperature: 1.0,
                humidity: 10.0,
            },
            Reading {
                timestamp: now - 600,
                temperature: 2.0,
                humidity: 20.0,
            },
        ]));
        let app = crate::routes::router(test_state(store.clone()));
        let (_, _, body) = get_body(app, "/api/readings/series?hours=24&maxpts=-1").await;
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["temperature"], serde_json::json!([2.0]));
        assert_eq!(store.windows(), vec![ReadingWindow::LastHours(24)]);
    }

    #[tokio::test]
    async fn slow_store_times_out() {
        let store = Arc::new(
            MemoryReadingStore::new(five_readings()).with_delay(Duration::from_secs(5)),
        );
        let app = crate::routes::router(test_state(store));
        let (status, _, _) = get_body(app, "/api/readings/series").await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn store_failure_maps_to_service_unavailable() {
        let store = Arc::new(MemoryReadingStore::failing());
        let app = crate::routes::router(test_state(store));
        let (status, _, _) = get_body(app, "/api/readings/series").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn latest_returns_last_reading_or_not_found() {
        let empty = Arc::new(MemoryReadingStore::new(Vec::new()));
        let result = latest(State(empty as Arc<dyn ReadingSource>)).await;
        let err = match result {
            Ok(_) => panic!("expected not found"),
            Err(err) => err,
        };
        assert_eq!(err.0, StatusCode::NOT_FOUND);

        let store = Arc::new(MemoryReadingStore::new(five_readings()));
        let Json(body) = latest(State(store as Arc<dyn ReadingSource>))
            .await
            .unwrap();
        assert_eq!(body.dateandtime, 500);
        assert_eq!(body.temperature, 14.0);
    }

    #[tokio::test]
    async fn ingest_stores_readings() {
        let store = Arc::new(MemoryReadingStore::new(Vec::new()));
        let app = crate::routes::router(test_state(store.clone()));
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/readings")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        r#"{"items":[{"temperature":21.3,"humidity":45.5,"timestamp":"2026-06-01T08:00:00Z"}]}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: ReadingIngestResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.ingested, 1);

        let stored = store.stored();
        assert_eq!(stored.len(), 1);
        assert_eq!(
            stored[0].timestamp,
            Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap().timestamp()
        );
        assert_eq!(stored[0].temperature, 21.3);
    }
}
