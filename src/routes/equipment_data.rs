use axum::extract::{RawQuery, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Duration, Months, NaiveDateTime, Utc};
use chrono_tz::Tz;
use futures::future::try_join_all;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::config::CoreConfig;
use crate::error::{internal_error, map_db_error, AppError, AppResult};
use crate::services::equipment_store;
use crate::services::schedule_book::ScheduleBook;
use crate::services::utilization::{
    self, AnnotatedSample, EquipmentSample, ScheduleByDate, UtilizationStats,
};
use crate::state::AppState;
use crate::time::{local_midnight, resolve_local};

#[derive(Debug, Clone, PartialEq, serde::Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ScheduleDescriptor {
    start_minute: Option<u16>,
    end_minute: Option<u16>,
    is_workday: bool,
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EquipmentDataPoint {
    equipment_id: String,
    /// Raw reading behind the enabled flag.
    u: Option<f64>,
    enabled: bool,
    disabled_during_active_time: bool,
    enabled_during_passive_time: bool,
    time: String,
}

impl From<AnnotatedSample<Tz>> for EquipmentDataPoint {
    fn from(sample: AnnotatedSample<Tz>) -> Self {
        Self {
            equipment_id: sample.equipment_id,
            u: sample.value,
            enabled: sample.enabled,
            disabled_during_active_time: sample.disabled_during_active_time,
            enabled_during_passive_time: sample.enabled_during_passive_time,
            time: sample.time.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EquipmentDataResponse {
    /// Resolved schedule per ISO date; dates without any schedule are absent.
    schedules: BTreeMap<String, ScheduleDescriptor>,
    equipment_data: Vec<EquipmentDataPoint>,
    total_minutes: i64,
    up_minutes: i64,
    down_minutes: i64,
    up_schedule_minutes: i64,
    down_schedule_minutes: i64,
    up_not_schedule_minutes: i64,
    down_not_schedule_minutes: i64,
    up_schedule_percent: f64,
    down_schedule_percent: f64,
}

impl EquipmentDataResponse {
    fn new(schedule_by_date: &ScheduleByDate, stats: UtilizationStats<Tz>) -> Self {
        let schedules = schedule_by_date
            .iter()
            .map(|(date, schedule)| {
                let range = schedule.active_range();
                (
                    date.format("%Y-%m-%d").to_string(),
                    ScheduleDescriptor {
                        start_minute: range.map(|(start, _)| start),
                        end_minute: range.map(|(_, end)| end),
                        is_workday: schedule.is_workday(),
                    },
                )
            })
            .collect();

        Self {
            schedules,
            equipment_data: stats.samples.into_iter().map(Into::into).collect(),
            total_minutes: stats.total_minutes,
            up_minutes: stats.up_minutes,
            down_minutes: stats.down_minutes,
            up_schedule_minutes: stats.up_schedule_minutes,
            down_schedule_minutes: stats.down_schedule_minutes,
            up_not_schedule_minutes: stats.up_not_schedule_minutes,
            down_not_schedule_minutes: stats.down_not_schedule_minutes,
            up_schedule_percent: stats.up_schedule_percent,
            down_schedule_percent: stats.down_schedule_percent,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct EquipmentDataQuery {
    pub(crate) ids: Vec<String>,
    pub(crate) start: DateTime<Tz>,
    pub(crate) stop: DateTime<Tz>,
}

#[utoipa::path(
    get,
    path = "/equipment-data",
    tag = "equipment",
    params(
        ("ids" = String, Query, description = "Comma separated equipment ids; may be repeated"),
        ("start" = Option<String>, Query, description = "Window start (RFC3339); defaults to local midnight one lookback period ago"),
        ("stop" = Option<String>, Query, description = "Window end (RFC3339, exclusive); defaults to now")
    ),
    responses(
        (status = 200, description = "Utilization statistics", body = EquipmentDataResponse),
        (status = 400, description = "Invalid query"),
        (status = 404, description = "Unknown equipment id")
    )
)]
pub(crate) async fn equipment_data(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> AppResult<Json<EquipmentDataResponse>> {
    let query = parse_query(raw.as_deref(), Utc::now(), &state.config)?;
    let tz = state.config.timezone;

    let known = equipment_store::fetch_known_equipment_ids(&state.db, &query.ids)
        .await
        .map_err(map_db_error)?;
    if let Some(missing) = query.ids.iter().find(|id| !known.contains(*id)) {
        return Err(AppError::not_found(format!("Equipment not found: {missing}")));
    }

    let records = equipment_store::fetch_schedule_records(&state.db)
        .await
        .map_err(map_db_error)?;
    let book = ScheduleBook::from_records(records);
    // `stop` is exclusive, so a window ending at midnight does not reach that date.
    let last_date = (query.stop - Duration::nanoseconds(1)).date_naive();
    let schedule_by_date =
        Arc::new(book.resolve_schedules_in_range(query.start.date_naive(), last_date));

    let start_utc = query.start.with_timezone(&Utc);
    let stop_utc = query.stop.with_timezone(&Utc);
    let per_equipment = try_join_all(
        query
            .ids
            .iter()
            .map(|id| equipment_store::fetch_samples(&state.db, id, start_utc, stop_utc)),
    )
    .await
    .map_err(map_db_error)?;

    let computations = query.ids.iter().zip(per_equipment).map(|(id, samples)| {
        tracing::debug!(equipment_id = %id, samples = samples.len(), "computing utilization");
        let schedule_by_date = Arc::clone(&schedule_by_date);
        let (start, stop) = (query.start, query.stop);
        tokio::task::spawn_blocking(move || {
            let samples: Vec<EquipmentSample<Tz>> = samples
                .into_iter()
                .map(|sample| sample.with_timezone(&tz))
                .collect();
            utilization::calculate(&samples, &schedule_by_date, &start, &stop)
        })
    });
    let parts = try_join_all(computations).await.map_err(internal_error)?;
    let stats = UtilizationStats::combine(parts);

    tracing::info!(
        equipment = query.ids.len(),
        scheduled_dates = schedule_by_date.len(),
        up_schedule_percent = stats.up_schedule_percent,
        "equipment utilization computed"
    );
    Ok(Json(EquipmentDataResponse::new(&schedule_by_date, stats)))
}

/// Reads `ids`, `start` and `stop` from the raw query string.
///
/// `ids` accepts comma separated values and repeated `ids` / `ids[]` keys.
pub(crate) fn parse_query(
    raw: Option<&str>,
    now: DateTime<Utc>,
    config: &CoreConfig,
) -> AppResult<EquipmentDataQuery> {
    let tz = config.timezone;
    let mut ids = Vec::new();
    let mut seen = HashSet::new();
    let mut start_raw = None;
    let mut stop_raw = None;

    for (key, value) in url::form_urlencoded::parse(raw.unwrap_or_default().as_bytes()) {
        match key.as_ref() {
            "ids" | "ids[]" => {
                for id in value.split(',').map(str::trim).filter(|id| !id.is_empty()) {
                    if seen.insert(id.to_string()) {
                        ids.push(id.to_string());
                    }
                }
            }
            "start" => start_raw = Some(value.into_owned()),
            "stop" => stop_raw = Some(value.into_owned()),
            _ => {}
        }
    }

    if ids.is_empty() {
        return Err(AppError::bad_request("Missing ids"));
    }
    if ids.len() > config.max_equipment_ids {
        return Err(AppError::bad_request(format!(
            "Too many ids (max {})",
            config.max_equipment_ids
        )));
    }

    let now_local = now.with_timezone(&tz);
    let start = match start_raw {
        Some(value) => parse_datetime(&value, "start", &tz)?,
        None => default_start(&now_local, config.default_lookback_months),
    };
    let stop = match stop_raw {
        Some(value) => parse_datetime(&value, "stop", &tz)?,
        None => now_local,
    };
    if start >= stop {
        return Err(AppError::bad_request("Stop must be after start"));
    }
    let max_window = Duration::days(i64::from(config.max_window_days));
    if stop - start > max_window {
        return Err(AppError::bad_request(format!(
            "Requested window too large (max {} days)",
            config.max_window_days
        )));
    }

    Ok(EquipmentDataQuery { ids, start, stop })
}

/// Local midnight `months` calendar months before `now`.
fn default_start(now: &DateTime<Tz>, months: u32) -> DateTime<Tz> {
    let today = now.date_naive();
    let first_date = today
        .checked_sub_months(Months::new(months))
        .unwrap_or(today);
    local_midnight(&now.timezone(), first_date)
}

/// RFC3339 timestamps keep their offset; bare `YYYY-MM-DDTHH:MM:SS` values are
/// read as wall-clock time in `tz`.
fn parse_datetime(value: &str, field: &'static str, tz: &Tz) -> AppResult<DateTime<Tz>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::bad_request(format!("Missing {field}")));
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(ts.with_timezone(tz));
    }

    let naive = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S")
        .map_err(|_| AppError::bad_request(format!("Invalid {field} timestamp")))?;
    Ok(resolve_local(tz, naive))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/equipment-data", get(equipment_data))
}
