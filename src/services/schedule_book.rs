use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::services::utilization::{DaySchedule, InvalidWindow, ScheduleByDate};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error(transparent)]
    InvalidWindow(#[from] InvalidWindow),
    #[error("a default schedule for {slot} already exists (schedule {existing})")]
    DefaultAlreadyExists { slot: DefaultKey, existing: i64 },
    #[error("schedule {id} is the only default schedule")]
    LastDefault { id: i64 },
    #[error("schedule {id} not found")]
    NotFound { id: i64 },
}

/// Fallback slot a dateless schedule occupies: one weekday, or every day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DefaultKey(pub Option<Weekday>);

impl fmt::Display for DefaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(weekday) => write!(f, "{weekday}"),
            None => f.write_str("every day"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRecord {
    pub id: i64,
    pub weekday: Option<Weekday>,
    /// Set for one-off overrides; `None` makes the record a default.
    pub date: Option<NaiveDate>,
    pub schedule: DaySchedule,
}

impl ScheduleRecord {
    pub fn default_key(&self) -> Option<DefaultKey> {
        self.date.is_none().then_some(DefaultKey(self.weekday))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DefaultSlot {
    #[default]
    NoDefault,
    HasDefault(i64),
}

impl DefaultSlot {
    pub fn assign(self, key: DefaultKey, id: i64) -> Result<Self, ScheduleError> {
        match self {
            Self::NoDefault => Ok(Self::HasDefault(id)),
            Self::HasDefault(existing) if existing == id => Ok(self),
            Self::HasDefault(existing) => Err(ScheduleError::DefaultAlreadyExists {
                slot: key,
                existing,
            }),
        }
    }

    /// `remaining_defaults` counts occupied slots other than this one.
    pub fn release(self, id: i64, remaining_defaults: usize) -> Result<Self, ScheduleError> {
        match self {
            Self::HasDefault(existing) if existing == id => {
                if remaining_defaults == 0 {
                    Err(ScheduleError::LastDefault { id })
                } else {
                    Ok(Self::NoDefault)
                }
            }
            _ => Ok(self),
        }
    }
}

/// In-memory view of the operating schedule records.
///
/// Keeps at most one default per [`DefaultKey`] and refuses to drop the last
/// remaining default. Resolves the schedule that applies to each date.
#[derive(Debug, Clone, Default)]
pub struct ScheduleBook {
    records: BTreeMap<i64, ScheduleRecord>,
    slots: HashMap<DefaultKey, DefaultSlot>,
}

impl ScheduleBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a book from persisted records, skipping any record that
    /// conflicts with one loaded before it.
    pub fn from_records(records: impl IntoIterator<Item = ScheduleRecord>) -> Self {
        let mut book = Self::new();
        for record in records {
            let id = record.id;
            if let Err(err) = book.insert(record) {
                tracing::warn!(schedule_id = id, error = %err, "skipping conflicting schedule record");
            }
        }
        book
    }

    pub fn records(&self) -> impl Iterator<Item = &ScheduleRecord> {
        self.records.values()
    }

    pub fn default_count(&self) -> usize {
        occupied(&self.slots, None)
    }

    pub fn insert(&mut self, record: ScheduleRecord) -> Result<(), ScheduleError> {
        if self.records.contains_key(&record.id) {
            return self.update(record);
        }
        if let Some(key) = record.default_key() {
            let slot = self.slot(key).assign(key, record.id)?;
            self.slots.insert(key, slot);
        }
        self.records.insert(record.id, record);
        Ok(())
    }

    /// Replaces a record. Moving a default to another slot or to a specific
    /// date frees its old slot.
    pub fn update(&mut self, record: ScheduleRecord) -> Result<(), ScheduleError> {
        let previous = self
            .records
            .get(&record.id)
            .ok_or(ScheduleError::NotFound { id: record.id })?;
        let old_key = previous.default_key();
        let new_key = record.default_key();

        if old_key != new_key {
            let mut slots = self.slots.clone();
            if let Some(key) = new_key {
                let slot = slots.get(&key).copied().unwrap_or_default();
                slots.insert(key, slot.assign(key, record.id)?);
            }
            if let Some(key) = old_key {
                release_slot(&mut slots, key, record.id)?;
            }
            self.slots = slots;
        }

        self.records.insert(record.id, record);
        Ok(())
    }

    pub fn remove(&mut self, id: i64) -> Result<ScheduleRecord, ScheduleError> {
        let key = self
            .records
            .get(&id)
            .ok_or(ScheduleError::NotFound { id })?
            .default_key();
        if let Some(key) = key {
            release_slot(&mut self.slots, key, id)?;
        }
        self.records
            .remove(&id)
            .ok_or(ScheduleError::NotFound { id })
    }

    /// Schedule per date in `first..=last`: date override, then weekday
    /// default, then the every-day default. Dates nothing applies to are left
    /// out.
    pub fn resolve_schedules_in_range(&self, first: NaiveDate, last: NaiveDate) -> ScheduleByDate {
        let mut overrides: HashMap<NaiveDate, &ScheduleRecord> = HashMap::new();
        for record in self.records.values() {
            if let Some(date) = record.date.filter(|date| (first..=last).contains(date)) {
                overrides.entry(date).or_insert(record);
            }
        }

        let mut resolved = ScheduleByDate::new();
        for date in first.iter_days().take_while(|date| *date <= last) {
            let record = overrides
                .get(&date)
                .copied()
                .or_else(|| self.default_for(DefaultKey(Some(date.weekday()))))
                .or_else(|| self.default_for(DefaultKey(None)));
            if let Some(record) = record {
                resolved.insert(date, record.schedule);
            }
        }
        resolved
    }

    fn slot(&self, key: DefaultKey) -> DefaultSlot {
        self.slots.get(&key).copied().unwrap_or_default()
    }

    fn default_for(&self, key: DefaultKey) -> Option<&ScheduleRecord> {
        match self.slot(key) {
            DefaultSlot::HasDefault(id) => self.records.get(&id),
            DefaultSlot::NoDefault => None,
        }
    }
}

fn occupied(slots: &HashMap<DefaultKey, DefaultSlot>, except: Option<DefaultKey>) -> usize {
    slots
        .iter()
        .filter(|(key, slot)| Some(**key) != except && matches!(slot, DefaultSlot::HasDefault(_)))
        .count()
}

fn release_slot(
    slots: &mut HashMap<DefaultKey, DefaultSlot>,
    key: DefaultKey,
    id: i64,
) -> Result<(), ScheduleError> {
    let remaining = occupied(slots, Some(key));
    let slot = slots.get(&key).copied().unwrap_or_default();
    slots.insert(key, slot.release(id, remaining)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn office_hours() -> DaySchedule {
        DaySchedule::workday(9 * 60, 18 * 60).expect("schedule")
    }

    fn record(id: i64, weekday: Option<Weekday>, date: Option<NaiveDate>) -> ScheduleRecord {
        ScheduleRecord {
            id,
            weekday,
            date,
            schedule: office_hours(),
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).expect("date")
    }

    #[test]
    fn invalid_window_converts_into_schedule_error() {
        let err: ScheduleError = DaySchedule::workday(600, 600).unwrap_err().into();
        assert!(matches!(
            err,
            ScheduleError::InvalidWindow(InvalidWindow {
                start_minute: 600,
                end_minute: 600
            })
        ));
    }

    #[test]
    fn slot_state_machine_transitions() {
        let key = DefaultKey(Some(Weekday::Mon));
        let slot = DefaultSlot::NoDefault.assign(key, 1).expect("assign");
        assert_eq!(slot, DefaultSlot::HasDefault(1));
        assert_eq!(slot.assign(key, 1), Ok(DefaultSlot::HasDefault(1)));
        assert_eq!(
            slot.assign(key, 2),
            Err(ScheduleError::DefaultAlreadyExists {
                slot: key,
                existing: 1
            })
        );
        assert_eq!(slot.release(1, 0), Err(ScheduleError::LastDefault { id: 1 }));
        assert_eq!(slot.release(1, 1), Ok(DefaultSlot::NoDefault));
        assert_eq!(slot.release(7, 0), Ok(slot));
    }

    #[test]
    fn resolves_override_then_weekday_then_global() {
        // 2024-01-01 is a Monday.
        let mut weekend = record(2, Some(Weekday::Sat), None);
        weekend.schedule = DaySchedule::NonWorkday;
        let mut holiday = record(3, None, Some(day(2)));
        holiday.schedule = DaySchedule::NonWorkday;
        let mut monday = record(4, Some(Weekday::Mon), None);
        monday.schedule = DaySchedule::workday(6 * 60, 14 * 60).expect("monday");
        let book = ScheduleBook::from_records([record(1, None, None), weekend, holiday, monday]);

        let resolved = book.resolve_schedules_in_range(day(1), day(7));

        assert_eq!(resolved.len(), 7);
        assert_eq!(resolved[&day(1)], DaySchedule::workday(6 * 60, 14 * 60).expect("monday"));
        assert_eq!(resolved[&day(2)], DaySchedule::NonWorkday);
        assert_eq!(resolved[&day(3)], office_hours());
        assert_eq!(resolved[&day(6)], DaySchedule::NonWorkday);
        assert_eq!(resolved[&day(7)], office_hours());
    }

    #[test]
    fn dates_without_any_schedule_are_left_out() {
        let book = ScheduleBook::from_records([record(1, Some(Weekday::Wed), None)]);

        let resolved = book.resolve_schedules_in_range(day(1), day(14));

        assert_eq!(resolved.keys().copied().collect::<Vec<_>>(), vec![day(3), day(10)]);
    }

    #[test]
    fn rejects_second_default_for_the_same_weekday() {
        let mut book = ScheduleBook::new();
        book.insert(record(1, Some(Weekday::Fri), None)).expect("first");

        let err = book.insert(record(2, Some(Weekday::Fri), None)).unwrap_err();
        assert!(matches!(err, ScheduleError::DefaultAlreadyExists { existing: 1, .. }));
        // Date overrides never compete for a slot.
        book.insert(record(3, Some(Weekday::Fri), Some(day(5))))
            .expect("override");
        assert_eq!(book.records().count(), 2);
    }

    #[test]
    fn last_default_cannot_be_removed_or_retargeted() {
        let mut book = ScheduleBook::new();
        book.insert(record(1, None, None)).expect("global");

        assert_eq!(book.remove(1), Err(ScheduleError::LastDefault { id: 1 }));
        assert_eq!(
            book.update(record(1, None, Some(day(9)))),
            Err(ScheduleError::LastDefault { id: 1 })
        );
        assert_eq!(book.default_count(), 1);

        book.insert(record(2, Some(Weekday::Sun), None)).expect("sunday");
        book.update(record(1, None, Some(day(9)))).expect("retarget");
        assert_eq!(book.default_count(), 1);
        assert_eq!(book.remove(2), Err(ScheduleError::LastDefault { id: 2 }));
    }

    #[test]
    fn moving_a_default_between_weekdays_frees_the_old_slot() {
        let mut book = ScheduleBook::new();
        book.insert(record(1, Some(Weekday::Mon), None)).expect("monday");
        book.update(record(1, Some(Weekday::Tue), None)).expect("move");

        book.insert(record(2, Some(Weekday::Mon), None)).expect("monday again");
        assert_eq!(book.default_count(), 2);
        assert_eq!(book.remove(99), Err(ScheduleError::NotFound { id: 99 }));
    }

    #[test]
    fn loading_skips_conflicting_defaults() {
        let book = ScheduleBook::from_records([
            record(1, Some(Weekday::Thu), None),
            record(2, Some(Weekday::Thu), None),
        ]);

        let ids: Vec<_> = book.records().map(|r| r.id).collect();
        assert_eq!(ids, vec![1]);
    }
}
