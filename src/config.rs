use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_SETUP_CONFIG_PATH: &str = "/etc/equipment-utilization/config.json";
const DEFAULT_MAX_EQUIPMENT_IDS: u64 = 50;
const DEFAULT_LOOKBACK_MONTHS: u64 = 1;
const DEFAULT_DB_MAX_CONNECTIONS: u64 = 10;
const DEFAULT_MAX_WINDOW_DAYS: u64 = 800;

pub(crate) fn setup_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("CORE_SETUP_CONFIG_PATH") {
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
    timezone: Option<String>,
    #[serde(default)]
    max_equipment_ids: Option<u64>,
    #[serde(default)]
    default_lookback_months: Option<u64>,
    #[serde(default)]
    db_max_connections: Option<u64>,
    #[serde(default)]
    max_window_days: Option<u64>,
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

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub database_url: String,
    /// Zone that defines calendar days and schedule wall-clock times.
    pub timezone: Tz,
    pub max_equipment_ids: usize,
    pub default_lookback_months: u32,
    pub db_max_connections: u32,
    /// Longest accepted `/equipment-data` window; never shorter than the default lookback.
    pub max_window_days: u32,
}

impl CoreConfig {
    pub fn from_env() -> Result<Self> {
        let overrides = load_setup_config_overrides(&setup_config_path()).unwrap_or_default();

        let database_url = env_optional_string("CORE_DATABASE_URL")
            .or_else(|| non_empty(overrides.database_url.as_deref()))
            .context("CORE_DATABASE_URL must be set (or present as database_url in the setup config)")?;
        let database_url = normalize_database_url(database_url);

        let configured_timezone =
            env_optional_string("CORE_TIMEZONE").or_else(|| non_empty(overrides.timezone.as_deref()));
        let host_timezone = iana_time_zone::get_timezone().ok();
        let timezone = resolve_timezone(configured_timezone.as_deref(), host_timezone.as_deref())?;

        let max_equipment_ids = env_u64("CORE_MAX_EQUIPMENT_IDS")
            .or(overrides.max_equipment_ids)
            .unwrap_or(DEFAULT_MAX_EQUIPMENT_IDS)
            .clamp(1, 500) as usize;
        let default_lookback_months = env_u64("CORE_DEFAULT_LOOKBACK_MONTHS")
            .or(overrides.default_lookback_months)
            .unwrap_or(DEFAULT_LOOKBACK_MONTHS)
            .clamp(1, 24) as u32;
        let db_max_connections = env_u64("CORE_DB_MAX_CONNECTIONS")
            .or(overrides.db_max_connections)
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .clamp(1, 100) as u32;
        let max_window_days = env_u64("CORE_MAX_WINDOW_DAYS")
            .or(overrides.max_window_days)
            .unwrap_or(DEFAULT_MAX_WINDOW_DAYS)
            .clamp(1, 3660) as u32;
        let max_window_days = max_window_days.max(default_lookback_months * 31 + 1);

        Ok(Self {
            database_url,
            timezone,
            max_equipment_ids,
            default_lookback_months,
            db_max_connections,
            max_window_days,
        })
    }
}

/// An explicitly configured zone must parse; the host zone falls back to UTC.
fn resolve_timezone(configured: Option<&str>, host: Option<&str>) -> Result<Tz> {
    if let Some(name) = configured {
        return name
            .parse::<Tz>()
            .map_err(|err| anyhow::anyhow!("CORE_TIMEZONE {name:?} is not a valid IANA zone: {err}"));
    }
    match host.map(|name| name.parse::<Tz>()) {
        Some(Ok(tz)) => Ok(tz),
        Some(Err(err)) => {
            tracing::warn!(error = %err, "host timezone not recognised; using UTC");
            Ok(Tz::UTC)
        }
        None => Ok(Tz::UTC),
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
}

fn env_optional_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
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
