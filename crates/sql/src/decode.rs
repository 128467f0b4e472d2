//! Driver rows to JSON rows, and JSON variables to driver bindings.
//!
//! Values that cannot be represented (binary blobs, unknown types) decode
//! to `null` rather than failing the whole page.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use ferry_core::dataset::Row as DatasetRow;
use serde_json::{Number, Value};
use sqlx::mysql::{MySql, MySqlRow};
use sqlx::postgres::{PgRow, Postgres};
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::{Column, Decode, Row, TypeInfo, ValueRef};

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// Field names reported by the driver, in select order.
pub fn column_names<R: Row>(row: &R) -> Vec<String> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

pub fn pg_row(row: &PgRow) -> DatasetRow {
    let mut out = DatasetRow::new();
    for (idx, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), pg_value(row, idx));
    }
    out
}

pub fn mysql_row(row: &MySqlRow) -> DatasetRow {
    let mut out = DatasetRow::new();
    for (idx, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), mysql_value(row, idx));
    }
    out
}

pub fn sqlite_row(row: &SqliteRow) -> DatasetRow {
    let mut out = DatasetRow::new();
    for (idx, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), sqlite_value(row, idx));
    }
    out
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

fn pg_value(row: &PgRow, idx: usize) -> Value {
    let Ok(raw) = row.try_get_raw(idx) else {
        return Value::Null;
    };
    if raw.is_null() {
        return Value::Null;
    }
    let type_name = row.column(idx).type_info().name().to_string();
    let decoded = match type_name.as_str() {
        "BOOL" => row.try_get::<bool, _>(idx).map(Value::Bool),
        "INT2" => row.try_get::<i16, _>(idx).map(Value::from),
        "INT4" => row.try_get::<i32, _>(idx).map(Value::from),
        "INT8" => row.try_get::<i64, _>(idx).map(Value::from),
        "FLOAT4" => row.try_get::<f32, _>(idx).map(|f| float(f64::from(f))),
        "FLOAT8" => row.try_get::<f64, _>(idx).map(float),
        "NUMERIC" => {
            return match <&[u8] as Decode<Postgres>>::decode(raw) {
                Ok(bytes) => pg_numeric_text(bytes).map_or(Value::Null, |t| numeric(&t)),
                Err(_) => Value::Null,
            };
        }
        "JSON" | "JSONB" => row.try_get::<Value, _>(idx),
        "TIMESTAMPTZ" => row
            .try_get::<DateTime<Utc>, _>(idx)
            .map(|d| Value::String(d.to_rfc3339())),
        "TIMESTAMP" => row
            .try_get::<NaiveDateTime, _>(idx)
            .map(|d| Value::String(d.to_string())),
        "DATE" => row.try_get::<NaiveDate, _>(idx).map(|d| Value::String(d.to_string())),
        "TIME" => row.try_get::<NaiveTime, _>(idx).map(|d| Value::String(d.to_string())),
        "UUID" => row
            .try_get::<uuid::Uuid, _>(idx)
            .map(|u| Value::String(u.to_string())),
        _ => row.try_get::<String, _>(idx).map(Value::String),
    };
    decoded.unwrap_or(Value::Null)
}

fn mysql_value(row: &MySqlRow, idx: usize) -> Value {
    let Ok(raw) = row.try_get_raw(idx) else {
        return Value::Null;
    };
    if raw.is_null() {
        return Value::Null;
    }
    let type_name = row.column(idx).type_info().name().to_string();
    let decoded = match type_name.as_str() {
        "BOOLEAN" => row.try_get::<bool, _>(idx).map(Value::Bool),
        name if name.ends_with("INT UNSIGNED") => row.try_get::<u64, _>(idx).map(Value::from),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            row.try_get::<i64, _>(idx).map(Value::from)
        }
        "FLOAT" => row.try_get::<f32, _>(idx).map(|f| float(f64::from(f))),
        "DOUBLE" => row.try_get::<f64, _>(idx).map(float),
        "DECIMAL" => {
            return <&str as Decode<MySql>>::decode(raw).map_or(Value::Null, numeric);
        }
        "JSON" => row.try_get::<Value, _>(idx),
        "DATETIME" => row
            .try_get::<NaiveDateTime, _>(idx)
            .map(|d| Value::String(d.to_string())),
        "TIMESTAMP" => row
            .try_get::<DateTime<Utc>, _>(idx)
            .map(|d| Value::String(d.to_rfc3339())),
        "DATE" => row.try_get::<NaiveDate, _>(idx).map(|d| Value::String(d.to_string())),
        "TIME" => row.try_get::<NaiveTime, _>(idx).map(|d| Value::String(d.to_string())),
        _ => {
            return <String as Decode<MySql>>::decode(raw).map_or(Value::Null, Value::String);
        }
    };
    decoded.unwrap_or(Value::Null)
}

/// SQLite values are typed by storage class, not declared column type.
fn sqlite_value(row: &SqliteRow, idx: usize) -> Value {
    let Ok(raw) = row.try_get_raw(idx) else {
        return Value::Null;
    };
    if raw.is_null() {
        return Value::Null;
    }
    let storage = raw.type_info().name().to_string();
    match storage.as_str() {
        "INTEGER" => <i64 as Decode<Sqlite>>::decode(raw).map_or(Value::Null, Value::from),
        "REAL" => <f64 as Decode<Sqlite>>::decode(raw).map_or(Value::Null, float),
        "TEXT" => <String as Decode<Sqlite>>::decode(raw).map_or(Value::Null, Value::String),
        _ => Value::Null,
    }
}

fn float(f: f64) -> Value {
    Number::from_f64(f).map_or(Value::Null, Value::Number)
}

/// Exact decimals become integers when they have no fraction, floats otherwise.
fn numeric(text: &str) -> Value {
    let text = text.trim();
    if let Ok(i) = text.parse::<i64>() {
        return Value::from(i);
    }
    match text.parse::<f64>() {
        Ok(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Value::from(f as i64),
        Ok(f) => float(f),
        Err(_) => Value::String(text.to_string()),
    }
}

/// Render a Postgres binary `NUMERIC` as decimal text.
///
/// Layout: ndigits, weight, sign, dscale (each 16 bit, big endian), then
/// `ndigits` base-10000 digits. `None` for NaN/infinity or short input.
pub fn pg_numeric_text(bytes: &[u8]) -> Option<String> {
    let word = |at: usize| -> Option<u16> {
        let pair = bytes.get(at..at + 2)?;
        Some(u16::from_be_bytes([pair[0], pair[1]]))
    };
    let ndigits = word(0)? as usize;
    let weight = word(2)? as i16 as i32;
    let sign = word(4)?;
    let dscale = word(6)? as usize;
    let digits: Vec<u16> = (0..ndigits).map(|i| word(8 + i * 2)).collect::<Option<_>>()?;

    let negative = match sign {
        0x0000 => false,
        0x4000 => true,
        _ => return None,
    };
    let digit = |i: i32| -> u16 {
        usize::try_from(i)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut text = String::new();
    if negative {
        text.push('-');
    }
    if weight < 0 {
        text.push('0');
    } else {
        for i in 0..=weight {
            if i == 0 {
                text.push_str(&digit(i).to_string());
            } else {
                text.push_str(&format!("{:04}", digit(i)));
            }
        }
    }
    if dscale > 0 {
        let groups = dscale.div_ceil(4);
        let mut fraction = String::with_capacity(groups * 4);
        for k in 0..groups as i32 {
            fraction.push_str(&format!("{:04}", digit(weight + 1 + k)));
        }
        fraction.truncate(dscale);
        text.push('.');
        text.push_str(&fraction);
    }
    Some(text)
}

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

/// A JSON variable in the shape a driver can bind.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Only produced for Postgres, which will not compare text to timestamps.
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Json(Value),
}

/// Shape a variable for binding. Nulls never reach here; they are inlined.
pub fn binding(value: &Value, typed_dates: bool) -> Binding {
    match value {
        Value::Null => Binding::Json(Value::Null),
        Value::Bool(b) => Binding::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Binding::Int(i),
            None => Binding::Float(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) if typed_dates => {
            date_binding(s).unwrap_or_else(|| Binding::Text(s.clone()))
        }
        Value::String(s) => Binding::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => Binding::Json(value.clone()),
    }
}

fn date_binding(text: &str) -> Option<Binding> {
    if let Ok(d) = DateTime::parse_from_rfc3339(text) {
        return Some(Binding::TimestampTz(d.with_timezone(&Utc)));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(Binding::Timestamp)
}

macro_rules! bind_all {
    ($query:expr, $bindings:expr) => {{
        let mut query = $query;
        for b in $bindings {
            query = match b {
                Binding::Bool(v) => query.bind(v),
                Binding::Int(v) => query.bind(v),
                Binding::Float(v) => query.bind(v),
                Binding::Text(v) => query.bind(v),
                Binding::Timestamp(v) => query.bind(v),
                Binding::TimestampTz(v) => query.bind(v),
                Binding::Json(v) => query.bind(sqlx::types::Json(v)),
            };
        }
        query
    }};
}

pub(crate) use bind_all;
