use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_SETUP_CONFIG_PATH: &str = "/etc/weather-station/config.json";
pub const DEFAULT_MAX_POINTS: u32 = 2000;

pub(crate) fn setup_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("STATION_SETUP_CONFIG_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    PathBuf::from(DEFAULT_SETUP_CONFIG_PATH)
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SetupConfigOverrides {
    #[serde(default)]
    database_url: Option<String>,
    #[serde(default)]
    db_max_connections: Option<u32>,
    #[serde(default)]
    fetch_timeout_seconds: Option<u64>,
    #[serde(default)]
    default_max_points: Option<u32>,
    #[serde(default)]
    ensure_schema: Option<bool>,
    #[serde(default)]
    cors_allowed_origins: Option<Vec<String>>,
}

fn load_setup_config_overrides(path: &Path) -> Option<SetupConfigOverrides> {
    if !path.exists() {
        return None;
    }
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to read setup config; using env defaults"
            );
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to parse setup config; using env defaults"
            );
            None
        }
    }
}

/// Setup-file values only apply where the matching env var is unset.
fn apply_setup_overrides(config: &mut StationConfig, overrides: &SetupConfigOverrides) {
    if env_optional_string("STATION_DB_MAX_CONNECTIONS").is_none() {
        if let Some(value) = overrides.db_max_connections.filter(|v| *v != 0) {
            config.db_max_connections = value.clamp(1, 64);
        }
    }
    if env_optional_string("STATION_FETCH_TIMEOUT_SECONDS").is_none() {
        if let Some(value) = overrides.fetch_timeout_seconds.filter(|v| *v != 0) {
            config.fetch_timeout_seconds = value.clamp(1, 600);
        }
    }
    if env_optional_string("STATION_DEFAULT_MAX_POINTS").is_none() {
        if let Some(value) = overrides.default_max_points.filter(|v| *v != 0) {
            config.default_max_points = value;
        }
    }
    if env_optional_string("STATION_ENSURE_SCHEMA").is_none() {
        if let Some(enabled) = overrides.ensure_schema {
            config.ensure_schema = enabled;
        }
    }
    if env_optional_string("STATION_CORS_ALLOWED_ORIGINS").is_none() {
        if let Some(origins) = overrides.cors_allowed_origins.as_ref() {
            config.cors_allowed_origins = origins
                .iter()
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect();
        }
    }
}

#[derive(Debug, Clone)]
pub struct StationConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub fetch_timeout_seconds: u64,
    pub default_max_points: u32,
    pub ensure_schema: bool,
    pub cors_allowed_origins: Vec<String>,
}

impl StationConfig {
    pub fn from_env() -> Result<Self> {
        let path = setup_config_path();
        let overrides = load_setup_config_overrides(&path);
        Self::resolve(overrides)
    }

    fn resolve(setup_overrides: Option<SetupConfigOverrides>) -> Result<Self> {
        let database_url = env_optional_string("STATION_DATABASE_URL")
            .or_else(|| {
                setup_overrides
                    .as_ref()
                    .and_then(|ov| ov.database_url.as_deref())
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(|value| value.to_string())
            })
            .context("STATION_DATABASE_URL must be set (or present as database_url in the setup config)")?;
        let database_url = normalize_database_url(database_url);

        let db_max_connections = env_u32("STATION_DB_MAX_CONNECTIONS", 10).clamp(1, 64);
        let fetch_timeout_seconds = env_u64("STATION_FETCH_TIMEOUT_SECONDS", 20).clamp(1, 600);
        let default_max_points = env_u32("STATION_DEFAULT_MAX_POINTS", DEFAULT_MAX_POINTS).max(1);
        let ensure_schema = env_bool("STATION_ENSURE_SCHEMA", true);
        let cors_allowed_origins = env_list("STATION_CORS_ALLOWED_ORIGINS");

        let mut config = Self {
            database_url,
            db_max_connections,
            fetch_timeout_seconds,
            default_max_points,
            ensure_schema,
            cors_allowed_origins,
        };

        if let Some(overrides) = setup_overrides.as_ref() {
            apply_setup_overrides(&mut config, overrides);
        }

        Ok(config)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }
}

fn env_optional_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key)
        .ok()
        .map(|value| value.trim().to_lowercase())
    {
        Some(value) if value == "1" || value == "true" || value == "yes" => true,
        Some(value) if value == "0" || value == "false" || value == "no" => false,
        _ => default,
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_list(key: &str) -> Vec<String> {
    env_optional_string(key)
        .map(|value| {
            value
                .split(',')
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn normalize_database_url(url: String) -> String {
    if let Some(stripped) = url.strip_prefix("postgresql+psycopg://") {
        return format!("postgresql://{stripped}");
    }
    if let Some(stripped) = url.strip_prefix("postgresql+asyncpg://") {
        return format!("postgresql://{stripped}");
    }
    url
}
