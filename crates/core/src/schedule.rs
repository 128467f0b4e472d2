//! Schedule definitions for cron-triggered migrations and next-fire math.
//!
//! A migration's `cron_expression` column stores one [`Schedule`] as JSON.
//! Time-of-day based schedules are evaluated at a fixed UTC offset chosen
//! by the worker configuration.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc, Weekday,
};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Days searched ahead for the next weekday-restricted fire.
const SEARCH_DAYS: i64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    Seconds,
    Minutes,
    Hours,
}

/// One trigger definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// Every N units, measured from the previous fire.
    Interval { every: u32, unit: IntervalUnit },
    /// Every N minutes inside `[start, end)` on the given weekdays.
    Window {
        #[serde(rename = "everyMinutes")]
        every_minutes: u32,
        #[serde(with = "clock_time")]
        start: NaiveTime,
        #[serde(with = "clock_time")]
        end: NaiveTime,
        #[serde(default)]
        weekdays: Vec<Weekday>,
    },
    /// Once a day at `at` on the given weekdays.
    TimeOfDay {
        #[serde(with = "clock_time")]
        at: NaiveTime,
        #[serde(default)]
        weekdays: Vec<Weekday>,
    },
}

impl Schedule {
    /// Parse and validate a stored `cron_expression`.
    pub fn parse(text: &str) -> Result<Self, CoreError> {
        let schedule: Schedule = serde_json::from_str(text)
            .map_err(|e| CoreError::Validation(format!("Invalid schedule: {e}")))?;
        schedule.validate()?;
        Ok(schedule)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            Self::Interval { every, .. } if *every == 0 => Err(CoreError::Validation(
                "Interval schedule needs 'every' greater than zero".into(),
            )),
            Self::Window { every_minutes, .. } if *every_minutes == 0 => {
                Err(CoreError::Validation(
                    "Window schedule needs 'everyMinutes' greater than zero".into(),
                ))
            }
            Self::Window { start, end, .. } if start >= end => Err(CoreError::Validation(format!(
                "Window schedule start {start} must be before end {end}"
            ))),
            _ => Ok(()),
        }
    }

    /// The first fire instant strictly after `after`.
    ///
    /// `None` only if no fire exists within the search horizon, which a
    /// validated schedule never hits.
    pub fn next_fire(&self, after: DateTime<Utc>, offset: FixedOffset) -> Option<DateTime<Utc>> {
        match self {
            Self::Interval { every, unit } => {
                let every = i64::from(*every);
                let step = match unit {
                    IntervalUnit::Seconds => Duration::try_seconds(every)?,
                    IntervalUnit::Minutes => Duration::try_minutes(every)?,
                    IntervalUnit::Hours => Duration::try_hours(every)?,
                };
                after.checked_add_signed(step)
            }
            Self::Window {
                every_minutes,
                start,
                end,
                weekdays,
            } => {
                let step = Duration::try_minutes(i64::from(*every_minutes))?;
                if step <= Duration::zero() {
                    return None;
                }
                let local = after.with_timezone(&offset).naive_local();
                for day in candidate_days(local.date(), weekdays) {
                    let mut slot = day.and_time(*start);
                    let close = day.and_time(*end);
                    while slot < close {
                        if slot > local {
                            return to_utc(slot, offset);
                        }
                        slot += step;
                    }
                }
                None
            }
            Self::TimeOfDay { at, weekdays } => {
                let local = after.with_timezone(&offset).naive_local();
                candidate_days(local.date(), weekdays)
                    .map(|day| day.and_time(*at))
                    .find(|slot| *slot > local)
                    .and_then(|slot| to_utc(slot, offset))
            }
        }
    }
}

fn candidate_days(from: NaiveDate, weekdays: &[Weekday]) -> impl Iterator<Item = NaiveDate> + '_ {
    (0..SEARCH_DAYS)
        .filter_map(move |n| from.checked_add_signed(Duration::days(n)))
        .filter(move |d| weekdays.is_empty() || weekdays.contains(&d.weekday()))
}

fn to_utc(local: chrono::NaiveDateTime, offset: FixedOffset) -> Option<DateTime<Utc>> {
    offset
        .from_local_datetime(&local)
        .single()
        .map(|d| d.with_timezone(&Utc))
}

/// Build the fixed offset used for schedule evaluation.
pub fn utc_offset(minutes: i32) -> Result<FixedOffset, CoreError> {
    minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| {
            CoreError::Validation(format!("UTC offset of {minutes} minutes is out of range"))
        })
}

/// `HH:MM` or `HH:MM:SS` clock times.
mod clock_time {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&time.format("%H:%M:%S"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let text = String::deserialize(d)?;
        NaiveTime::parse_from_str(&text, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(&text, "%H:%M"))
            .map_err(|_| serde::de::Error::custom(format!("invalid clock time '{text}'")))
    }
}
