//! Translate `$1..$n` variable markers into each backend's syntax.
//!
//! Callers always write `$n`. Postgres keeps numbered markers, SQLite and
//! MySQL get `?` with the variables reordered (and repeated) by occurrence.
//! `NULL` variables are inlined so no backend has to infer the type of an
//! untyped null. Markers inside single-quoted literals are left alone.

use ferry_core::bound_query::BoundQuery;
use ferry_core::data_source::BackendType;
use serde_json::Value;

use crate::error::AdapterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerStyle {
    /// `$1`, `$2`, ... (Postgres).
    Numbered,
    /// `?` per occurrence (SQLite, MySQL).
    Positional,
}

impl From<BackendType> for MarkerStyle {
    fn from(backend: BackendType) -> Self {
        match backend {
            BackendType::Postgres => Self::Numbered,
            BackendType::Sqlite | BackendType::Mysql => Self::Positional,
        }
    }
}

/// Rewrite `query` for `style`, returning the SQL text and the variables
/// in the order the backend expects them.
pub fn translate(
    query: &BoundQuery,
    style: MarkerStyle,
) -> Result<(String, Vec<Value>), AdapterError> {
    let sql = &query.sql;
    let mut out = String::with_capacity(sql.len());
    let mut values: Vec<Value> = Vec::new();
    // Original marker number -> new marker number, for Numbered.
    let mut renumbered: Vec<Option<usize>> = vec![None; query.variables.len()];
    let mut in_literal = false;

    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c == b'\'' {
            in_literal = !in_literal;
        }
        if c == b'$' && !in_literal {
            let digits_end = bytes[i + 1..]
                .iter()
                .position(|b| !b.is_ascii_digit())
                .map_or(bytes.len(), |p| i + 1 + p);
            if digits_end > i + 1 {
                let n: usize = sql[i + 1..digits_end]
                    .parse()
                    .map_err(|_| AdapterError::Query(format!("Bad variable marker at byte {i}")))?;
                let value = n
                    .checked_sub(1)
                    .and_then(|idx| query.variables.get(idx))
                    .ok_or_else(|| {
                        AdapterError::Query(format!("Variable marker ${n} has no value"))
                    })?;

                if value.is_null() {
                    out.push_str("NULL");
                } else {
                    match style {
                        MarkerStyle::Positional => {
                            values.push(value.clone());
                            out.push('?');
                        }
                        MarkerStyle::Numbered => {
                            let slot = &mut renumbered[n - 1];
                            let new_n = match slot {
                                Some(existing) => *existing,
                                None => {
                                    values.push(value.clone());
                                    *slot = Some(values.len());
                                    values.len()
                                }
                            };
                            out.push('$');
                            out.push_str(&new_n.to_string());
                        }
                    }
                }
                i = digits_end;
                continue;
            }
        }
        // Copy the whole UTF-8 sequence starting here.
        let len = utf8_len(c);
        out.push_str(&sql[i..i + len]);
        i += len;
    }

    Ok((out, values))
}

fn utf8_len(first: u8) -> usize {
    match first {
        b if b < 0x80 => 1,
        b if b >= 0xF0 => 4,
        b if b >= 0xE0 => 3,
        _ => 2,
    }
}

/// Wrap a statement so the backend pages it.
pub fn paged(sql: &str, limit: Option<i64>, offset: Option<i64>) -> String {
    let inner = strip_terminator(sql);
    match (limit, offset) {
        (None, None) => inner.to_string(),
        (limit, offset) => {
            let mut wrapped = format!("SELECT * FROM ({inner}) AS sub");
            // SQLite and MySQL require LIMIT before OFFSET.
            wrapped.push_str(&format!(" LIMIT {}", limit.unwrap_or(i64::MAX)));
            if let Some(offset) = offset {
                wrapped.push_str(&format!(" OFFSET {offset}"));
            }
            wrapped
        }
    }
}

/// Wrap a statement as a row count.
pub fn counted(sql: &str) -> String {
    format!("SELECT COUNT(*) FROM ({}) AS sub", strip_terminator(sql))
}

fn strip_terminator(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn query(sql: &str, vars: Vec<Value>) -> BoundQuery {
        BoundQuery { sql: sql.into(), variables: vars }
    }

    #[test]
    fn positional_reorders_by_occurrence() {
        let q = query(
            "SELECT * FROM t WHERE b = $2 AND a = $1 OR b = $2",
            vec![json!(1), json!("x")],
        );
        let (sql, vars) = translate(&q, MarkerStyle::Positional).unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE b = ? AND a = ? OR b = ?");
        assert_eq!(vars, vec![json!("x"), json!(1), json!("x")]);
    }

    #[test]
    fn numbered_passes_through_and_dedupes() {
        let q = query(
            "SELECT * FROM t WHERE b = $2 AND a = $1 OR b = $2",
            vec![json!(1), json!("x")],
        );
        let (sql, vars) = translate(&q, MarkerStyle::Numbered).unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE b = $1 AND a = $2 OR b = $1");
        assert_eq!(vars, vec![json!("x"), json!(1)]);
    }

    #[test]
    fn nulls_are_inlined_and_later_markers_renumbered() {
        let q = query(
            "INSERT INTO t (a, b, c) VALUES ($1, $2, $3)",
            vec![json!(1), Value::Null, json!(3)],
        );
        let (sql, vars) = translate(&q, MarkerStyle::Numbered).unwrap();
        assert_eq!(sql, "INSERT INTO t (a, b, c) VALUES ($1, NULL, $2)");
        assert_eq!(vars, vec![json!(1), json!(3)]);
    }

    #[test]
    fn quoted_markers_are_untouched() {
        let q = query("SELECT '$1 costs' AS label, 'it''s $2' FROM t WHERE a = $1", vec![json!(5)]);
        let (sql, vars) = translate(&q, MarkerStyle::Positional).unwrap();
        assert_eq!(sql, "SELECT '$1 costs' AS label, 'it''s $2' FROM t WHERE a = ?");
        assert_eq!(vars, vec![json!(5)]);
    }

    #[test]
    fn missing_variable_is_an_error() {
        let q = query("SELECT $3", vec![json!(1)]);
        assert_matches!(translate(&q, MarkerStyle::Positional), Err(AdapterError::Query(_)));
        let q = query("SELECT $0", vec![json!(1)]);
        assert_matches!(translate(&q, MarkerStyle::Numbered), Err(AdapterError::Query(_)));
    }

    #[test]
    fn non_marker_dollars_survive() {
        let q = query("SELECT 'ü' || $$body$$, $1", vec![json!("é")]);
        let (sql, _) = translate(&q, MarkerStyle::Positional).unwrap();
        assert_eq!(sql, "SELECT 'ü' || $$body$$, ?");
    }

    #[test]
    fn paging_and_counting_wrap_the_statement() {
        assert_eq!(
            paged("SELECT * FROM users;", Some(100), Some(200)),
            "SELECT * FROM (SELECT * FROM users) AS sub LIMIT 100 OFFSET 200"
        );
        assert_eq!(paged("SELECT 1", None, None), "SELECT 1");
        assert_eq!(
            counted(" SELECT * FROM users ; "),
            "SELECT COUNT(*) FROM (SELECT * FROM users) AS sub"
        );
    }
}
