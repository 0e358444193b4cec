use chrono::{DateTime, Duration, TimeZone};

use super::EquipmentSample;
use crate::time::local_midnight;

/// Returns a copy of `samples` that covers `[start, end)` without gaps and in
/// which no sample spans a local midnight.
///
/// * A disabled synthetic sample is prepended at `start` when the data begins
///   later (or is empty).
/// * The last known state is extrapolated with a synthetic sample at `end`.
/// * A synthetic sample carrying the previous state is inserted at every
///   midnight strictly between two neighbours.
///
/// Every sample then gets `duration` set to the gap to its successor.
/// Callers guarantee `start < end` and that `samples` is sorted by time.
pub fn normalize<Tz: TimeZone>(
    samples: &[EquipmentSample<Tz>],
    start: &DateTime<Tz>,
    end: &DateTime<Tz>,
) -> Vec<EquipmentSample<Tz>> {
    let bounded = cover_window(samples, start, end);
    let mut normalized = split_at_midnights(bounded);
    assign_durations(&mut normalized);

    tracing::trace!(
        input = samples.len(),
        output = normalized.len(),
        "normalized equipment samples"
    );
    normalized
}

fn cover_window<Tz: TimeZone>(
    samples: &[EquipmentSample<Tz>],
    start: &DateTime<Tz>,
    end: &DateTime<Tz>,
) -> Vec<EquipmentSample<Tz>> {
    let mut bounded = Vec::with_capacity(samples.len() + 2);

    let equipment_id = samples
        .first()
        .map(|sample| sample.equipment_id.as_str())
        .unwrap_or_default();
    if samples.first().map_or(true, |first| first.time > *start) {
        // Nothing is known before the first reading; treat it as disabled.
        bounded.push(EquipmentSample::synthetic(
            equipment_id,
            start.clone(),
            false,
        ));
    }
    bounded.extend(samples.iter().cloned());

    let tail = bounded
        .last()
        .filter(|last| last.time < *end)
        .map(|last| EquipmentSample::synthetic(&last.equipment_id, end.clone(), last.enabled));
    if let Some(tail) = tail {
        bounded.push(tail);
    }
    bounded
}

fn split_at_midnights<Tz: TimeZone>(samples: Vec<EquipmentSample<Tz>>) -> Vec<EquipmentSample<Tz>> {
    let mut split = Vec::with_capacity(samples.len());
    let mut iter = samples.into_iter().peekable();
    while let Some(sample) = iter.next() {
        let carried: Vec<EquipmentSample<Tz>> = match iter.peek() {
            Some(next) => midnights_between(&sample.time, &next.time)
                .into_iter()
                .map(|midnight| {
                    EquipmentSample::synthetic(&sample.equipment_id, midnight, sample.enabled)
                })
                .collect(),
            None => Vec::new(),
        };
        split.push(sample);
        split.extend(carried);
    }
    split
}

fn midnights_between<Tz: TimeZone>(from: &DateTime<Tz>, to: &DateTime<Tz>) -> Vec<DateTime<Tz>> {
    let tz = from.timezone();
    let last_day = to.date_naive();
    let mut day = from.date_naive();
    let mut midnights = Vec::new();
    while day < last_day {
        let Some(next_day) = day.succ_opt() else {
            break;
        };
        day = next_day;
        let midnight = local_midnight(&tz, day);
        if midnight > *from && midnight < *to {
            midnights.push(midnight);
        }
    }
    midnights
}

fn assign_durations<Tz: TimeZone>(samples: &mut [EquipmentSample<Tz>]) {
    for index in 0..samples.len() {
        let duration = match samples.get(index + 1) {
            Some(next) => next.time.clone() - samples[index].time.clone(),
            None => Duration::zero(),
        };
        samples[index].duration = duration;
    }
}
