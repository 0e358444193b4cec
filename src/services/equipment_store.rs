use chrono::{DateTime, NaiveDate, Utc, Weekday};
use sqlx::PgPool;
use std::collections::HashSet;

use crate::services::schedule_book::ScheduleRecord;
use crate::services::utilization::{DaySchedule, EquipmentSample};

#[derive(sqlx::FromRow)]
struct EquipmentStateRow {
    equipment_id: String,
    ts: DateTime<Utc>,
    enabled: bool,
    value: Option<f64>,
}

#[derive(sqlx::FromRow)]
struct ScheduleRow {
    id: i64,
    weekday: Option<i16>,
    date: Option<NaiveDate>,
    start_minute: i32,
    end_minute: i32,
    is_workday: bool,
}

pub async fn fetch_known_equipment_ids(
    db: &PgPool,
    ids: &[String],
) -> Result<HashSet<String>, sqlx::Error> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT id FROM equipment WHERE id = ANY($1)")
        .bind(ids)
        .fetch_all(db)
        .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Readings for one equipment with `start <= ts <= stop`, oldest first.
pub async fn fetch_samples(
    db: &PgPool,
    equipment_id: &str,
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
) -> Result<Vec<EquipmentSample<Utc>>, sqlx::Error> {
    let rows: Vec<EquipmentStateRow> = sqlx::query_as(
        r#"
        SELECT equipment_id, ts, enabled, value
        FROM equipment_states
        WHERE equipment_id = $1
          AND ts >= $2
          AND ts <= $3
        ORDER BY ts ASC
        "#,
    )
    .bind(equipment_id)
    .bind(start)
    .bind(stop)
    .fetch_all(db)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| EquipmentSample::real(row.equipment_id, row.ts, row.enabled, row.value))
        .collect())
}

pub async fn fetch_schedule_records(db: &PgPool) -> Result<Vec<ScheduleRecord>, sqlx::Error> {
    let rows: Vec<ScheduleRow> = sqlx::query_as(
        r#"
        SELECT id, weekday, date, start_minute, end_minute, is_workday
        FROM operating_schedules
        ORDER BY id ASC
        "#,
    )
    .fetch_all(db)
    .await?;

    Ok(rows.into_iter().filter_map(schedule_record_from_row).collect())
}

fn schedule_record_from_row(row: ScheduleRow) -> Option<ScheduleRecord> {
    let weekday = match row.weekday {
        None => None,
        Some(index) => match weekday_from_index(index) {
            Some(weekday) => Some(weekday),
            None => {
                tracing::warn!(schedule_id = row.id, weekday = index, "schedule has invalid weekday");
                return None;
            }
        },
    };

    let schedule = if row.is_workday {
        let start_minute = u16::try_from(row.start_minute).unwrap_or(u16::MAX);
        let end_minute = u16::try_from(row.end_minute).unwrap_or(u16::MAX);
        match DaySchedule::workday(start_minute, end_minute) {
            Ok(schedule) => schedule,
            Err(err) => {
                tracing::warn!(schedule_id = row.id, error = %err, "skipping schedule");
                return None;
            }
        }
    } else {
        DaySchedule::NonWorkday
    };

    Some(ScheduleRecord {
        id: row.id,
        weekday,
        date: row.date,
        schedule,
    })
}

fn weekday_from_index(index: i16) -> Option<Weekday> {
    match index {
        0 => Some(Weekday::Mon),
        1 => Some(Weekday::Tue),
        2 => Some(Weekday::Wed),
        3 => Some(Weekday::Thu),
        4 => Some(Weekday::Fri),
        5 => Some(Weekday::Sat),
        6 => Some(Weekday::Sun),
        _ => None,
    }
}
