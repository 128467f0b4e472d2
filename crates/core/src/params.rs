//! Typed parameter definitions and the resolver turning them into values.
//!
//! Literal parameters pass through unchanged. Date parameters are
//! expressions evaluated against "now": relative offsets, calendar unit
//! boundaries, or a fixed instant.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

/// Default rendering for resolved dates, understood by all three engines.
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// A named, typed parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub key: String,
    #[serde(flatten)]
    pub value: ParamValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamValue {
    String {
        value: String,
    },
    Number {
        value: serde_json::Number,
    },
    Boolean {
        value: bool,
    },
    Date {
        value: DateExpr,
        /// `strftime` pattern; defaults to [`DEFAULT_DATE_FORMAT`].
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format: Option<String>,
    },
}

/// A date expression evaluated relative to the resolution instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum DateExpr {
    Add {
        operations: Vec<DateOperation>,
    },
    Subtract {
        operations: Vec<DateOperation>,
    },
    StartOf {
        unit: DateUnit,
        #[serde(default)]
        position: BoundaryPosition,
    },
    EndOf {
        unit: DateUnit,
        #[serde(default)]
        position: BoundaryPosition,
    },
    Exact {
        value: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateOperation {
    pub amount: i64,
    pub unit: DateUnit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

/// Which occurrence of a unit boundary to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryPosition {
    #[default]
    Current,
    Next,
    Previous,
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve a parameter list into a flat name -> value map.
///
/// Later definitions of the same key override earlier ones.
pub fn resolve_params(
    params: &[Param],
    now: DateTime<Utc>,
) -> Result<serde_json::Map<String, Value>, CoreError> {
    let mut resolved = serde_json::Map::new();
    for param in params {
        if param.key.trim().is_empty() {
            return Err(CoreError::Validation("Parameter key must not be empty".into()));
        }
        let value = match &param.value {
            ParamValue::String { value } => Value::String(value.clone()),
            ParamValue::Number { value } => Value::Number(value.clone()),
            ParamValue::Boolean { value } => Value::Bool(*value),
            ParamValue::Date { value, format } => {
                let instant = resolve_date(value, now)?;
                let pattern = format.as_deref().unwrap_or(DEFAULT_DATE_FORMAT);
                Value::String(instant.format(pattern).to_string())
            }
        };
        resolved.insert(param.key.clone(), value);
    }
    Ok(resolved)
}

/// Evaluate a date expression against `now`.
pub fn resolve_date(expr: &DateExpr, now: DateTime<Utc>) -> Result<DateTime<Utc>, CoreError> {
    match expr {
        DateExpr::Add { operations } => operations
            .iter()
            .try_fold(now, |acc, op| shift(acc, op.unit, op.amount)),
        DateExpr::Subtract { operations } => operations
            .iter()
            .try_fold(now, |acc, op| shift(acc, op.unit, -op.amount)),
        // Boundary of the present unit first, then one unit either way.
        DateExpr::StartOf { unit, position } => {
            shift(start_of(now, *unit)?, *unit, position_offset(*position))
        }
        DateExpr::EndOf { unit, position } => {
            shift(end_of(now, *unit)?, *unit, position_offset(*position))
        }
        DateExpr::Exact { value } => Ok(*value),
    }
}

fn position_offset(position: BoundaryPosition) -> i64 {
    match position {
        BoundaryPosition::Current => 0,
        BoundaryPosition::Next => 1,
        BoundaryPosition::Previous => -1,
    }
}

/// Move `at` by `amount` units. Calendar units clamp to the month end.
pub fn shift(at: DateTime<Utc>, unit: DateUnit, amount: i64) -> Result<DateTime<Utc>, CoreError> {
    let overflow = || CoreError::Validation(format!("Date shift of {amount} {unit:?} overflows"));
    let fixed = |d: Duration| at.checked_add_signed(d).ok_or_else(overflow);
    let months = |n: i64| -> Result<DateTime<Utc>, CoreError> {
        let count = u32::try_from(n.unsigned_abs()).map_err(|_| overflow())?;
        let shifted = if n >= 0 {
            at.checked_add_months(Months::new(count))
        } else {
            at.checked_sub_months(Months::new(count))
        };
        shifted.ok_or_else(overflow)
    };

    match unit {
        DateUnit::Second => fixed(Duration::try_seconds(amount).ok_or_else(overflow)?),
        DateUnit::Minute => fixed(Duration::try_minutes(amount).ok_or_else(overflow)?),
        DateUnit::Hour => fixed(Duration::try_hours(amount).ok_or_else(overflow)?),
        DateUnit::Day => fixed(Duration::try_days(amount).ok_or_else(overflow)?),
        DateUnit::Week => fixed(Duration::try_weeks(amount).ok_or_else(overflow)?),
        DateUnit::Month => months(amount),
        DateUnit::Quarter => months(amount.checked_mul(3).ok_or_else(overflow)?),
        DateUnit::Year => months(amount.checked_mul(12).ok_or_else(overflow)?),
    }
}

/// First instant of the unit containing `at`. Weeks start on Monday.
pub fn start_of(at: DateTime<Utc>, unit: DateUnit) -> Result<DateTime<Utc>, CoreError> {
    let date = at.date_naive();
    let midnight = |d: NaiveDate| Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN));
    let invalid = || CoreError::Internal(format!("Cannot compute start of {unit:?} for {at}"));

    let start = match unit {
        DateUnit::Second => at.with_nanosecond(0),
        DateUnit::Minute => at.with_nanosecond(0).and_then(|d| d.with_second(0)),
        DateUnit::Hour => at
            .with_nanosecond(0)
            .and_then(|d| d.with_second(0))
            .and_then(|d| d.with_minute(0)),
        DateUnit::Day => Some(midnight(date)),
        DateUnit::Week => {
            let back = i64::from(date.weekday().num_days_from_monday());
            Some(midnight(date - Duration::days(back)))
        }
        DateUnit::Month => date.with_day(1).map(midnight),
        DateUnit::Quarter => {
            let first_month = (date.month0() / 3) * 3 + 1;
            NaiveDate::from_ymd_opt(date.year(), first_month, 1).map(midnight)
        }
        DateUnit::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1).map(midnight),
    };
    start.ok_or_else(invalid)
}

/// Last millisecond of the unit containing `at`.
pub fn end_of(at: DateTime<Utc>, unit: DateUnit) -> Result<DateTime<Utc>, CoreError> {
    let next_start = start_of(shift(start_of(at, unit)?, unit, 1)?, unit)?;
    Ok(next_start - Duration::milliseconds(1))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn literals_pass_through() {
        let params: Vec<Param> = serde_json::from_value(json!([
            {"key": "name", "type": "string", "value": "acme"},
            {"key": "limit", "type": "number", "value": 25},
            {"key": "active", "type": "boolean", "value": true},
        ]))
        .unwrap();
        let map = resolve_params(&params, Utc::now()).unwrap();
        assert_eq!(map["name"], "acme");
        assert_eq!(map["limit"], 25);
        assert_eq!(map["active"], true);
    }

    #[test]
    fn start_of_next_month_is_first_instant_of_following_month() {
        for now in [
            "2024-01-31T23:59:59Z",
            "2024-02-29T12:00:00Z",
            "2024-12-15T08:30:00Z",
        ] {
            let expr = DateExpr::StartOf {
                unit: DateUnit::Month,
                position: BoundaryPosition::Next,
            };
            let got = resolve_date(&expr, at(now)).unwrap();
            let base = at(now);
            let (y, m) = if base.month() == 12 {
                (base.year() + 1, 1)
            } else {
                (base.year(), base.month() + 1)
            };
            assert_eq!(got, Utc.with_ymd_and_hms(y, m, 1, 0, 0, 0).unwrap(), "from {now}");
        }
    }

    #[test]
    fn end_of_previous_month_handles_short_months() {
        let expr = DateExpr::EndOf {
            unit: DateUnit::Month,
            position: BoundaryPosition::Previous,
        };
        let got = resolve_date(&expr, at("2024-03-31T10:00:00Z")).unwrap();
        assert_eq!(got, at("2024-02-29T23:59:59.999Z"));
    }

    #[test]
    fn end_of_next_month_shifts_the_current_boundary() {
        let expr = DateExpr::EndOf {
            unit: DateUnit::Month,
            position: BoundaryPosition::Next,
        };
        // End of February, moved one month on; March's day count is not used.
        let got = resolve_date(&expr, at("2024-02-10T09:00:00Z")).unwrap();
        assert_eq!(got, at("2024-03-29T23:59:59.999Z"));

        let expr = DateExpr::EndOf {
            unit: DateUnit::Day,
            position: BoundaryPosition::Next,
        };
        let got = resolve_date(&expr, at("2024-02-10T09:00:00Z")).unwrap();
        assert_eq!(got, at("2024-02-11T23:59:59.999Z"));
    }

    #[test]
    fn start_of_week_is_monday() {
        let expr = DateExpr::StartOf {
            unit: DateUnit::Week,
            position: BoundaryPosition::Current,
        };
        // 2024-05-16 is a Thursday.
        let got = resolve_date(&expr, at("2024-05-16T15:00:00Z")).unwrap();
        assert_eq!(got, at("2024-05-13T00:00:00Z"));
    }

    #[test]
    fn start_of_quarter() {
        let expr = DateExpr::StartOf {
            unit: DateUnit::Quarter,
            position: BoundaryPosition::Current,
        };
        assert_eq!(
            resolve_date(&expr, at("2024-08-20T01:02:03Z")).unwrap(),
            at("2024-07-01T00:00:00Z")
        );
    }

    #[test]
    fn add_and_subtract_apply_operations_in_order() {
        let add = DateExpr::Add {
            operations: vec![
                DateOperation { amount: 1, unit: DateUnit::Month },
                DateOperation { amount: 2, unit: DateUnit::Day },
            ],
        };
        assert_eq!(
            resolve_date(&add, at("2024-01-31T00:00:00Z")).unwrap(),
            at("2024-03-02T00:00:00Z")
        );

        let sub = DateExpr::Subtract {
            operations: vec![DateOperation { amount: 90, unit: DateUnit::Minute }],
        };
        assert_eq!(
            resolve_date(&sub, at("2024-01-01T01:00:00Z")).unwrap(),
            at("2023-12-31T23:30:00Z")
        );
    }

    #[test]
    fn date_params_use_format() {
        let params: Vec<Param> = serde_json::from_value(json!([
            {"key": "from", "type": "date", "value": {"mode": "startOf", "unit": "day"}},
            {"key": "day", "type": "date", "format": "%Y-%m-%d",
             "value": {"mode": "exact", "value": "2024-06-01T12:00:00Z"}},
        ]))
        .unwrap();
        let map = resolve_params(&params, at("2024-05-16T15:00:00Z")).unwrap();
        assert_eq!(map["from"], "2024-05-16 00:00:00");
        assert_eq!(map["day"], "2024-06-01");
    }

    #[test]
    fn empty_key_is_rejected() {
        let params = vec![Param {
            key: " ".into(),
            value: ParamValue::Boolean { value: true },
        }];
        assert!(resolve_params(&params, Utc::now()).is_err());
    }
}
