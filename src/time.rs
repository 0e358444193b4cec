use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike};

const GAP_SEARCH_MINUTES: i64 = 180;

/// Maps a wall-clock datetime in `tz` onto exactly one instant.
///
/// Ambiguous local times (DST fall-back) resolve to the earlier instant. Local
/// times that fall into a DST gap resolve to the first valid local minute after
/// the gap.
pub fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(a, b) => {
            if a <= b {
                a
            } else {
                b
            }
        }
        LocalResult::None => find_next_valid_local(tz, naive, GAP_SEARCH_MINUTES)
            .unwrap_or_else(|| tz.from_utc_datetime(&naive)),
    }
}

/// First instant of `date` in `tz`.
pub fn local_midnight<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Tz> {
    resolve_local(tz, date.and_time(NaiveTime::MIN))
}

/// Instant at `minute` minutes past local midnight of `date`.
pub fn local_minute<Tz: TimeZone>(tz: &Tz, date: NaiveDate, minute: u16) -> DateTime<Tz> {
    let naive = date.and_time(NaiveTime::MIN) + Duration::minutes(i64::from(minute));
    resolve_local(tz, naive)
}

pub fn minute_of_day<Tz: TimeZone>(dt: &DateTime<Tz>) -> u32 {
    dt.hour() * 60 + dt.minute()
}

fn find_next_valid_local<Tz: TimeZone>(
    tz: &Tz,
    naive: NaiveDateTime,
    max_minutes: i64,
) -> Option<DateTime<Tz>> {
    for minutes in 1..=max_minutes {
        let candidate = naive + Duration::minutes(minutes);
        match tz.from_local_datetime(&candidate) {
            LocalResult::Single(dt) => return Some(dt),
            LocalResult::Ambiguous(a, b) => return Some(if a <= b { a } else { b }),
            LocalResult::None => continue,
        }
    }
    None
}
