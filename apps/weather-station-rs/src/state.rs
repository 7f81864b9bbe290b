use crate::config::StationConfig;
use crate::services::readings::ReadingSource;
use axum::extract::FromRef;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: StationConfig,
    pub readings: Arc<dyn ReadingSource>,
}

impl FromRef<AppState> for Arc<dyn ReadingSource> {
    fn from_ref(state: &AppState) -> Arc<dyn ReadingSource> {
        state.readings.clone()
    }
}
