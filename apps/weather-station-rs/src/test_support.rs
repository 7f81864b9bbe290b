use crate::config::{StationConfig, DEFAULT_MAX_POINTS};
use crate::services::readings::{NewReading, Reading, ReadingSource, ReadingWindow};
use crate::state::AppState;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn test_config() -> StationConfig {
    StationConfig {
        database_url: "postgresql://postgres@localhost/postgres".to_string(),
        db_max_connections: 2,
        fetch_timeout_seconds: 1,
        default_max_points: DEFAULT_MAX_POINTS,
        ensure_schema: false,
        cors_allowed_origins: Vec::new(),
    }
}

pub fn test_state(store: Arc<MemoryReadingStore>) -> AppState {
    AppState {
        config: test_config(),
        readings: store,
    }
}

/// Timestamps 100..=500, temperature 10..=14, humidity 50..=54.
pub fn five_readings() -> Vec<Reading> {
    (0..5)
        .map(|i| Reading {
            timestamp: 100 * (i + 1),
            temperature: 10.0 + i as f64,
            humidity: 50.0 + i as f64,
        })
        .collect()
}

/// In-memory [`ReadingSource`] that records the windows it was asked for.
#[derive(Default)]
pub struct MemoryReadingStore {
    readings: Mutex<Vec<Reading>>,
    windows: Mutex<Vec<ReadingWindow>>,
    delay: Option<Duration>,
    fail: bool,
}

impl MemoryReadingStore {
    pub fn new(mut readings: Vec<Reading>) -> Self {
        readings.sort_by_key(|r| r.timestamp);
        Self {
            readings: Mutex::new(readings),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn windows(&self) -> Vec<ReadingWindow> {
        self.windows.lock().expect("windows lock").clone()
    }

    pub fn stored(&self) -> Vec<Reading> {
        self.readings.lock().expect("readings lock").clone()
    }

    async fn pause(&self) -> Result<(), sqlx::Error> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(sqlx::Error::PoolTimedOut);
        }
        Ok(())
    }
}

#[async_trait]
impl ReadingSource for MemoryReadingStore {
    async fn fetch_readings(&self, window: ReadingWindow) -> Result<Vec<Reading>, sqlx::Error> {
        self.windows.lock().expect("windows lock").push(window);
        self.pause().await?;
        let since = window.since(Utc::now());
        let readings = self.readings.lock().expect("readings lock");
        Ok(readings
            .iter()
            .filter(|r| since.map_or(true, |since| r.timestamp >= since))
            .copied()
            .collect())
    }

    async fn latest_reading(&self) -> Result<Option<Reading>, sqlx::Error> {
        self.pause().await?;
        Ok(self.readings.lock().expect("readings lock").last().copied())
    }

    async fn insert_readings(&self, readings: &[NewReading]) -> Result<u64, sqlx::Error> {
        self.pause().await?;
        let mut stored = self.readings.lock().expect("readings lock");
        stored.extend(readings.iter().map(|r| Reading {
            timestamp: r.timestamp.timestamp(),
            temperature: r.temperature,
            humidity: r.humidity,
        }));
        stored.sort_by_key(|r| r.timestamp);
        Ok(readings.len() as u64)
    }
}
