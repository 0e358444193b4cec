use chrono::{DateTime, Duration, NaiveDate, TimeZone};
use std::cmp::{max, min};
use std::collections::BTreeMap;

use super::{AnnotatedSample, DaySchedule, EquipmentSample, ScheduleByDate, UtilizationStats};
use crate::time::{local_minute, minute_of_day};

#[derive(Debug, Clone)]
struct Span<Tz: TimeZone> {
    start: DateTime<Tz>,
    end: DateTime<Tz>,
}

impl<Tz: TimeZone> Span<Tz> {
    fn new(start: DateTime<Tz>, end: DateTime<Tz>) -> Self {
        Self { start, end }
    }

    fn intersect(&self, other: &Self) -> Option<Self> {
        let start = max(self.start.clone(), other.start.clone());
        let end = min(self.end.clone(), other.end.clone());
        (start < end).then(|| Self::new(start, end))
    }

    fn length(&self) -> Duration {
        self.end.clone() - self.start.clone()
    }
}

#[derive(Debug)]
struct Totals {
    up: Duration,
    up_schedule: Duration,
    down_schedule: Duration,
}

impl Totals {
    fn zero() -> Self {
        Self {
            up: Duration::zero(),
            up_schedule: Duration::zero(),
            down_schedule: Duration::zero(),
        }
    }
}

/// Correlates a normalized sample sequence (see [`super::normalize`]) with the
/// schedule of each date in `schedule_by_date`, restricted to `[start, end)`.
///
/// Only dates present in `schedule_by_date` contribute. A scheduled date that
/// has no samples at all counts its whole active window as down time.
/// A `NonWorkday` date still adds up time and annotates its samples; it only
/// has no active window, so it adds no scheduled minutes.
pub fn aggregate<Tz: TimeZone>(
    normalized: &[EquipmentSample<Tz>],
    schedule_by_date: &ScheduleByDate,
    start: &DateTime<Tz>,
    end: &DateTime<Tz>,
) -> UtilizationStats<Tz> {
    let tz = start.timezone();
    let window = Span::new(start.clone(), end.clone());
    let by_date = group_by_date(normalized);

    let mut totals = Totals::zero();
    let mut annotated = Vec::new();

    for (date, schedule) in schedule_by_date {
        let active = schedule.active_range().map(|(start_minute, end_minute)| {
            Span::new(
                local_minute(&tz, *date, start_minute),
                local_minute(&tz, *date, end_minute),
            )
        });

        let Some(day_samples) = by_date.get(date) else {
            if let Some(active) = active.and_then(|active| active.intersect(&window)) {
                totals.down_schedule = totals.down_schedule + active.length();
            }
            continue;
        };

        for sample in day_samples {
            let coverage = Span::new(sample.time.clone(), sample.end_time());
            if let Some(coverage) = coverage.intersect(&window) {
                if sample.enabled {
                    totals.up = totals.up + coverage.length();
                }
                if let Some(overlap) = active
                    .as_ref()
                    .and_then(|active| coverage.intersect(active))
                {
                    if sample.enabled {
                        totals.up_schedule = totals.up_schedule + overlap.length();
                    } else {
                        totals.down_schedule = totals.down_schedule + overlap.length();
                    }
                }
            }

            if sample.is_real && sample.time >= *start && sample.time < *end {
                annotated.push(annotate(sample, schedule));
            }
        }
    }

    let total = end.clone() - start.clone();
    UtilizationStats::from_minutes(
        total.num_minutes(),
        totals.up.num_minutes(),
        totals.up_schedule.num_minutes(),
        totals.down_schedule.num_minutes(),
        annotated,
    )
}

fn group_by_date<Tz: TimeZone>(
    samples: &[EquipmentSample<Tz>],
) -> BTreeMap<NaiveDate, Vec<&EquipmentSample<Tz>>> {
    let mut by_date: BTreeMap<NaiveDate, Vec<&EquipmentSample<Tz>>> = BTreeMap::new();
    for sample in samples {
        by_date
            .entry(sample.time.date_naive())
            .or_default()
            .push(sample);
    }
    by_date
}

// Flags look only at the sample's wall-clock minute, not at interval overlap.
fn annotate<Tz: TimeZone>(
    sample: &EquipmentSample<Tz>,
    schedule: &DaySchedule,
) -> AnnotatedSample<Tz> {
    let in_active_hours = schedule.covers_minute(minute_of_day(&sample.time));
    AnnotatedSample {
        equipment_id: sample.equipment_id.clone(),
        enabled: sample.enabled,
        value: sample.value,
        time: sample.time.clone(),
        disabled_during_active_time: in_active_hours && !sample.enabled,
        enabled_during_passive_time: !in_active_hours && sample.enabled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, hour, minute, 0)
            .single()
            .expect("timestamp")
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).expect("date")
    }

    fn office_hours() -> DaySchedule {
        DaySchedule::workday(9 * 60, 18 * 60).expect("schedule")
    }

    fn sample(
        time: DateTime<Utc>,
        duration: Duration,
        enabled: bool,
        is_real: bool,
    ) -> EquipmentSample<Utc> {
        EquipmentSample {
            equipment_id: "lathe".to_string(),
            enabled,
            value: None,
            time,
            duration,
            is_real,
        }
    }

    #[test]
    fn missing_schedule_entry_contributes_nothing() {
        let normalized = vec![
            sample(at(1, 0, 0), Duration::hours(24), true, true),
            sample(at(2, 0, 0), Duration::zero(), true, false),
        ];
        let stats = aggregate(
            &normalized,
            &ScheduleByDate::new(),
            &at(1, 0, 0),
            &at(2, 0, 0),
        );

        assert_eq!(stats.total_minutes, 1440);
        assert_eq!(stats.up_minutes, 0);
        assert_eq!(stats.down_minutes, 1440);
        assert_eq!(stats.up_schedule_minutes, 0);
        assert_eq!(stats.down_schedule_minutes, 0);
        assert!(stats.samples.is_empty());
    }

    #[test]
    fn day_without_samples_counts_active_window_as_down() {
        let schedule = ScheduleByDate::from([(date(2), office_hours())]);
        let stats = aggregate::<Utc>(&[], &schedule, &at(2, 0, 0), &at(3, 0, 0));

        assert_eq!(stats.down_schedule_minutes, 540);
        assert_eq!(stats.up_schedule_minutes, 0);
        assert_eq!(stats.down_minutes, 1440);
        assert_eq!(stats.down_not_schedule_minutes, 900);
        assert_eq!(stats.up_schedule_percent, 0.0);
        assert_eq!(stats.down_schedule_percent, 100.0);
    }

    #[test]
    fn day_without_samples_clips_active_window_to_range() {
        let schedule = ScheduleByDate::from([(date(2), office_hours())]);
        let stats = aggregate::<Utc>(&[], &schedule, &at(2, 12, 0), &at(2, 20, 0));

        assert_eq!(stats.down_schedule_minutes, 6 * 60);
    }

    #[test]
    fn coverage_is_clipped_to_the_window() {
        // Sample starts before the window and runs into the active period.
        let normalized = vec![
            sample(at(1, 4, 0), Duration::hours(8), true, true),
            sample(at(1, 12, 0), Duration::hours(12), false, true),
            sample(at(2, 0, 0), Duration::zero(), false, false),
        ];
        let schedule = ScheduleByDate::from([(date(1), office_hours())]);
        let stats = aggregate(&normalized, &schedule, &at(1, 6, 0), &at(2, 0, 0));

        assert_eq!(stats.total_minutes, 18 * 60);
        assert_eq!(stats.up_minutes, 6 * 60);
        assert_eq!(stats.up_schedule_minutes, 3 * 60);
        assert_eq!(stats.down_schedule_minutes, 6 * 60);
        // The 04:00 reading predates the window and is not reported.
        assert_eq!(stats.samples.len(), 1);
        assert_eq!(stats.samples[0].time, at(1, 12, 0));
    }

    #[test]
    fn non_workday_counts_uptime_but_no_scheduled_minutes() {
        let normalized = vec![
            sample(at(6, 0, 0), Duration::hours(10), false, false),
            sample(at(6, 10, 0), Duration::hours(14), true, true),
            sample(at(7, 0, 0), Duration::zero(), true, false),
        ];
        let schedule = ScheduleByDate::from([(date(6), DaySchedule::NonWorkday)]);
        let stats = aggregate(&normalized, &schedule, &at(6, 0, 0), &at(7, 0, 0));

        assert_eq!(stats.up_minutes, 14 * 60);
        assert_eq!(stats.up_schedule_minutes, 0);
        assert_eq!(stats.down_schedule_minutes, 0);
        assert_eq!(stats.up_not_schedule_minutes, 14 * 60);
        assert_eq!(stats.up_schedule_percent, 100.0);
        assert!(stats.samples[0].enabled_during_passive_time);
        assert!(!stats.samples[0].disabled_during_active_time);
    }

    #[test]
    fn annotation_bounds_are_inclusive() {
        let normalized = vec![
            sample(at(1, 0, 0), Duration::hours(9), false, false),
            sample(at(1, 9, 0), Duration::hours(9), false, true),
            sample(at(1, 18, 0), Duration::minutes(1), false, true),
            sample(at(1, 18, 1), Duration::minutes(359), true, true),
        ];
        let schedule = ScheduleByDate::from([(date(1), office_hours())]);
        let stats = aggregate(&normalized, &schedule, &at(1, 0, 0), &at(2, 0, 0));

        let flags: Vec<_> = stats
            .samples
            .iter()
            .map(|s| (s.disabled_during_active_time, s.enabled_during_passive_time))
            .collect();
        assert_eq!(flags, vec![(true, false), (true, false), (false, true)]);
    }
}
