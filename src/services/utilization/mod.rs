//! Equipment utilization statistics.
//!
//! Raw enabled/disabled readings are first normalized into a gap-free,
//! day-aligned sequence ([`normalize`]) and then correlated with the operating
//! schedule of every calendar date ([`aggregate`]). Both stages are pure: a
//! calculation owns its inputs and never touches I/O, so callers can run one
//! per equipment concurrently.

mod aggregate;
mod normalize;


pub use aggregate::aggregate;
pub use normalize::normalize;

use chrono::{DateTime, Duration, NaiveDate, TimeZone};
use std::collections::BTreeMap;

pub const MINUTES_PER_DAY: u16 = 24 * 60;

/// Resolved schedule per calendar date. Dates without an entry are neutral.
pub type ScheduleByDate = BTreeMap<NaiveDate, DaySchedule>;

/// Workday bounds that are empty, inverted or run past the end of the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid schedule window {start_minute}..{end_minute} (minutes past midnight)")]
pub struct InvalidWindow {
    pub start_minute: u16,
    pub end_minute: u16,
}

/// Operating window that applies to one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaySchedule {
    /// Equipment is expected to run from `start_minute` to `end_minute` past
    /// local midnight.
    Workday { start_minute: u16, end_minute: u16 },
    NonWorkday,
}

impl DaySchedule {
    pub fn workday(start_minute: u16, end_minute: u16) -> Result<Self, InvalidWindow> {
        if start_minute >= end_minute || end_minute >= MINUTES_PER_DAY {
            return Err(InvalidWindow {
                start_minute,
                end_minute,
            });
        }
        Ok(Self::Workday {
            start_minute,
            end_minute,
        })
    }

    pub fn is_workday(&self) -> bool {
        matches!(self, Self::Workday { .. })
    }

    pub fn active_range(&self) -> Option<(u16, u16)> {
        match *self {
            Self::Workday {
                start_minute,
                end_minute,
            } => Some((start_minute, end_minute)),
            Self::NonWorkday => None,
        }
    }

    /// Point-in-time check; both bounds are inclusive.
    pub fn covers_minute(&self, minute_of_day: u32) -> bool {
        self.active_range().is_some_and(|(start, end)| {
            (u32::from(start)..=u32::from(end)).contains(&minute_of_day)
        })
    }
}

/// One enabled/disabled reading for a piece of equipment.
#[derive(Debug, Clone, PartialEq)]
pub struct EquipmentSample<Tz: TimeZone> {
    pub equipment_id: String,
    pub enabled: bool,
    /// Raw reading the state was derived from; diagnostic only.
    pub value: Option<f64>,
    pub time: DateTime<Tz>,
    /// Gap to the next sample after normalization, zero for the last one.
    pub duration: Duration,
    /// False for boundary and day-split samples inserted by [`normalize`].
    pub is_real: bool,
}

impl<Tz: TimeZone> EquipmentSample<Tz> {
    pub fn real(
        equipment_id: impl Into<String>,
        time: DateTime<Tz>,
        enabled: bool,
        value: Option<f64>,
    ) -> Self {
        Self {
            equipment_id: equipment_id.into(),
            enabled,
            value,
            time,
            duration: Duration::zero(),
            is_real: true,
        }
    }

    pub(crate) fn synthetic(equipment_id: &str, time: DateTime<Tz>, enabled: bool) -> Self {
        Self {
            equipment_id: equipment_id.to_string(),
            enabled,
            value: None,
            time,
            duration: Duration::zero(),
            is_real: false,
        }
    }

    pub fn end_time(&self) -> DateTime<Tz> {
        self.time.clone() + self.duration
    }

    /// Same instant viewed in `tz`; calendar days follow the new zone.
    pub fn with_timezone<Tz2: TimeZone>(self, tz: &Tz2) -> EquipmentSample<Tz2> {
        EquipmentSample {
            equipment_id: self.equipment_id,
            enabled: self.enabled,
            value: self.value,
            time: self.time.with_timezone(tz),
            duration: self.duration,
            is_real: self.is_real,
        }
    }
}

/// Real sample flagged against the schedule of its day.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedSample<Tz: TimeZone> {
    pub equipment_id: String,
    pub enabled: bool,
    pub value: Option<f64>,
    pub time: DateTime<Tz>,
    pub disabled_during_active_time: bool,
    pub enabled_during_passive_time: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UtilizationStats<Tz: TimeZone> {
    pub total_minutes: i64,
    pub up_minutes: i64,
    pub down_minutes: i64,
    pub up_schedule_minutes: i64,
    pub down_schedule_minutes: i64,
    pub up_not_schedule_minutes: i64,
    pub down_not_schedule_minutes: i64,
    pub up_schedule_percent: f64,
    pub down_schedule_percent: f64,
    pub samples: Vec<AnnotatedSample<Tz>>,
}

impl<Tz: TimeZone> UtilizationStats<Tz> {
    /// Derives the dependent minute and percent fields from the four
    /// independent totals.
    pub(crate) fn from_minutes(
        total_minutes: i64,
        up_minutes: i64,
        up_schedule_minutes: i64,
        down_schedule_minutes: i64,
        mut samples: Vec<AnnotatedSample<Tz>>,
    ) -> Self {
        let down_minutes = total_minutes - up_minutes;
        let (up_schedule_percent, down_schedule_percent) =
            schedule_percents(up_schedule_minutes, down_schedule_minutes);
        samples.sort_by(|a, b| {
            a.time
                .cmp(&b.time)
                .then_with(|| a.equipment_id.cmp(&b.equipment_id))
        });

        Self {
            total_minutes,
            up_minutes,
            down_minutes,
            up_schedule_minutes,
            down_schedule_minutes,
            up_not_schedule_minutes: up_minutes - up_schedule_minutes,
            down_not_schedule_minutes: down_minutes - down_schedule_minutes,
            up_schedule_percent,
            down_schedule_percent,
            samples,
        }
    }

    /// Merges per-equipment results into one fleet-wide result.
    pub fn combine(parts: impl IntoIterator<Item = Self>) -> Self {
        let mut total_minutes = 0;
        let mut up_minutes = 0;
        let mut up_schedule_minutes = 0;
        let mut down_schedule_minutes = 0;
        let mut samples = Vec::new();
        for part in parts {
            total_minutes += part.total_minutes;
            up_minutes += part.up_minutes;
            up_schedule_minutes += part.up_schedule_minutes;
            down_schedule_minutes += part.down_schedule_minutes;
            samples.extend(part.samples);
        }
        Self::from_minutes(
            total_minutes,
            up_minutes,
            up_schedule_minutes,
            down_schedule_minutes,
            samples,
        )
    }
}

/// Normalizes `samples` and aggregates them against `schedule_by_date` over
/// `[start, end)`.
///
/// `samples` must be sorted by time and `start` must precede `end`; neither is
/// checked.
pub fn calculate<Tz: TimeZone>(
    samples: &[EquipmentSample<Tz>],
    schedule_by_date: &ScheduleByDate,
    start: &DateTime<Tz>,
    end: &DateTime<Tz>,
) -> UtilizationStats<Tz> {
    let normalized = normalize(samples, start, end);
    aggregate(&normalized, schedule_by_date, start, end)
}

fn schedule_percents(up_schedule_minutes: i64, down_schedule_minutes: i64) -> (f64, f64) {
    let scheduled = up_schedule_minutes + down_schedule_minutes;
    if scheduled == 0 {
        return (100.0, 0.0);
    }
    let up = 100.0 * up_schedule_minutes as f64 / scheduled as f64;
    (up, 100.0 - up)
}
