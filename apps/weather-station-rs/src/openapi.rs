use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::routes::{health, readings};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "weather-station-rs",
        description = "Downsampled temperature and humidity series"
    ),
    paths(
        health::healthz_handler,
        readings::series,
        readings::latest,
        readings::ingest,
    ),
    components(schemas(
        health::HealthResponse,
        readings::SeriesResponse,
        readings::LatestReadingResponse,
        readings::ReadingIngestItem,
        readings::ReadingIngestRequest,
        readings::ReadingIngestResponse,
    )),
    tags(
        (name = "readings", description = "Sensor readings"),
        (name = "health", description = "Liveness")
    )
)]
struct ApiDoc;

pub fn openapi_json() -> serde_json::Value {
    match serde_json::to_value(ApiDoc::openapi()) {
        Ok(value) => value,
        Err(err) => {
            tracing::error!(error = %err, "failed to render OpenAPI document");
            serde_json::Value::Null
        }
    }
}

async fn openapi_handler() -> Json<serde_json::Value> {
    Json(openapi_json())
}

pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_handler))
}
