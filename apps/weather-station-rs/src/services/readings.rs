use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Windows longer than this cover every plausible row and risk timestamp
/// overflow in `now() - interval`, so they are treated as unbounded.
pub const MAX_WINDOW_HOURS: i64 = 24 * 366 * 100;

/// One stored sensor reading. `timestamp` is whole seconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub timestamp: i64,
    pub temperature: f64,
    pub humidity: f64,
}

impl From<(i64, f64, f64)> for Reading {
    fn from((timestamp, temperature, humidity): (i64, f64, f64)) -> Self {
        Self {
            timestamp,
            temperature,
            humidity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewReading {
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub humidity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingWindow {
    Unbounded,
    /// Readings stamped within the last `n` hours, `n > 0`.
    LastHours(i32),
}

impl ReadingWindow {
    pub fn from_hours(hours: i64) -> Self {
        if hours <= 0 || hours > MAX_WINDOW_HOURS {
            return Self::Unbounded;
        }
        match i32::try_from(hours) {
            Ok(hours) => Self::LastHours(hours),
            Err(_) => Self::Unbounded,
        }
    }

    /// Earliest epoch second inside the window, relative to `now`.
    pub fn since(&self, now: DateTime<Utc>) -> Option<i64> {
        match self {
            Self::Unbounded => None,
            Self::LastHours(hours) => Some(now.timestamp() - i64::from(*hours) * 3600),
        }
    }
}

/// Source of stored readings. Implementations must return readings in
/// ascending timestamp order; the sampler reads position as chronology.
#[async_trait]
pub trait ReadingSource: Send + Sync {
    async fn fetch_readings(&self, window: ReadingWindow) -> Result<Vec<Reading>, sqlx::Error>;

    async fn latest_reading(&self) -> Result<Option<Reading>, sqlx::Error>;

    async fn insert_readings(&self, readings: &[NewReading]) -> Result<u64, sqlx::Error>;
}

#[derive(Clone)]
pub struct PgReadingStore {
    pool: PgPool,
}

impl PgReadingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReadingSource for PgReadingStore {
    async fn fetch_readings(&self, window: ReadingWindow) -> Result<Vec<Reading>, sqlx::Error> {
        let rows: Vec<(i64, f64, f64)> = match window {
            ReadingWindow::Unbounded => {
                sqlx::query_as(
                    r#"
                    SELECT floor(EXTRACT(EPOCH FROM dateandtime))::bigint, temperature, humidity
                    FROM temperaturedata
                    ORDER BY dateandtime ASC
                    "#,
                )
                .fetch_all(&self.pool)
                .await?
            }
            ReadingWindow::LastHours(hours) => {
                sqlx::query_as(
                    r#"
                    SELECT floor(EXTRACT(EPOCH FROM dateandtime))::bigint, temperature, humidity
                    FROM temperaturedata
                    WHERE dateandtime >= now() - make_interval(hours => $1)
                    ORDER BY dateandtime ASC
                    "#,
                )
                .bind(hours)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows.into_iter().map(Reading::from).collect())
    }

    async fn latest_reading(&self) -> Result<Option<Reading>, sqlx::Error> {
        let row: Option<(i64, f64, f64)> = sqlx::query_as(
            r#"
            SELECT floor(EXTRACT(EPOCH FROM dateandtime))::bigint, temperature, humidity
            FROM temperaturedata
            ORDER BY dateandtime DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Reading::from))
    }

    async fn insert_readings(&self, readings: &[NewReading]) -> Result<u64, sqlx::Error> {
        if readings.is_empty() {
            return Ok(0);
        }
        let timestamps: Vec<DateTime<Utc>> = readings.iter().map(|r| r.timestamp).collect();
        let temperatures: Vec<f64> = readings.iter().map(|r| r.temperature).collect();
        let humidities: Vec<f64> = readings.iter().map(|r| r.humidity).collect();

        let result = sqlx::query(
            r#"
            INSERT INTO temperaturedata (dateandtime, temperature, humidity)
            SELECT ts, temperature, humidity
            FROM unnest($1::timestamptz[], $2::float8[], $3::float8[])
                AS t(ts, temperature, humidity)
            "#,
        )
        .bind(&timestamps)
        .bind(&temperatures)
        .bind(&humidities)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS temperaturedata (
            dateandtime timestamptz not null default now(),
            temperature double precision not null,
            humidity double precision not null
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS temperaturedata_dateandtime_idx ON temperaturedata (dateandtime)",
    )
    .execute(pool)
    .await?;
    Ok(())
}
