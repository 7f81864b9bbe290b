pub mod health;
pub mod readings;

use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(readings::legacy_router())
        .nest(
            "/api",
            Router::new()
                .merge(readings::router())
                .merge(crate::openapi::router()),
        )
        .with_state(state)
}
