//! Textual `{{name}}` placeholder substitution.
//!
//! Placeholders are replaced by positional variable markers rather than by
//! inlined literals, so the values reach the backend as bound variables.
//! Substitution is purely textual; no SQL parsing happens here.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::bound_query::BoundQuery;
use crate::error::CoreError;

/// Regex pattern matching `{{name}}` and `{{dataset.column}}` placeholders.
pub const PLACEHOLDER_PATTERN: &str =
    r"\{\{\s*([A-Za-z_][A-Za-z0-9_\-]*(?:\.[A-Za-z0-9_\-]+)*)\s*\}\}";

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PLACEHOLDER_PATTERN).expect("valid regex"));

/// What a placeholder name resolves to.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaceholderValue {
    /// A single value, bound as one variable.
    Scalar(Value),
    /// A value list (e.g. a dataset column), bound as comma-separated variables.
    List(Vec<Value>),
}

/// Whether `text` is exactly one placeholder, returning its name.
pub fn as_placeholder(text: &str) -> Option<&str> {
    let caps = PLACEHOLDER_RE.captures(text.trim())?;
    let whole = caps.get(0)?;
    if whole.as_str().len() != text.trim().len() {
        return None;
    }
    caps.get(1).map(|m| m.as_str())
}

/// Substitute every placeholder in `query.sql`, appending the resolved
/// values to `query.variables`.
///
/// Fails on the first name `lookup` cannot resolve.
pub fn substitute<F>(query: BoundQuery, lookup: F) -> Result<BoundQuery, CoreError>
where
    F: Fn(&str) -> Option<PlaceholderValue>,
{
    let BoundQuery { sql, variables } = query;
    let mut out = BoundQuery {
        sql: String::with_capacity(sql.len()),
        variables,
    };

    let mut last = 0;
    for caps in PLACEHOLDER_RE.captures_iter(&sql) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&sql[last..whole.start()]);
        let marker = match lookup(name.as_str()) {
            Some(PlaceholderValue::Scalar(v)) => out.bind(v),
            Some(PlaceholderValue::List(values)) => out.bind_list(values),
            None => {
                return Err(CoreError::Validation(format!(
                    "Unresolved placeholder '{{{{{}}}}}'",
                    name.as_str()
                )))
            }
        };
        out.push_str(&marker);
        last = whole.end();
    }
    out.push_str(&sql[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn lookup(name: &str) -> Option<PlaceholderValue> {
        match name {
            "from" => Some(PlaceholderValue::Scalar(json!("2024-01-01"))),
            "users.id" => Some(PlaceholderValue::List(vec![json!(1), json!(2)])),
            "none.id" => Some(PlaceholderValue::List(vec![])),
            _ => None,
        }
    }

    #[test]
    fn scalars_and_lists_become_markers() {
        let q = substitute(
            BoundQuery::new("SELECT * FROM o WHERE at >= {{ from }} AND user_id IN ({{users.id}})"),
            lookup,
        )
        .unwrap();
        assert_eq!(q.sql, "SELECT * FROM o WHERE at >= $1 AND user_id IN ($2, $3)");
        assert_eq!(q.variables, vec![json!("2024-01-01"), json!(1), json!(2)]);
    }

    #[test]
    fn markers_continue_after_existing_variables() {
        let mut q = BoundQuery::new("SELECT * FROM o WHERE a = ");
        let m = q.bind(json!(5));
        q.push_str(&m);
        q.push_str(" AND b = {{from}}");
        let q = substitute(q, lookup).unwrap();
        assert_eq!(q.sql, "SELECT * FROM o WHERE a = $1 AND b = $2");
    }

    #[test]
    fn empty_list_renders_null() {
        let q = substitute(BoundQuery::new("x IN ({{none.id}})"), lookup).unwrap();
        assert_eq!(q.sql, "x IN (NULL)");
    }

    #[test]
    fn unknown_placeholder_fails() {
        let err = substitute(BoundQuery::new("x = {{nope}}"), lookup);
        assert_matches!(err, Err(CoreError::Validation(msg)) if msg.contains("nope"));
    }

    #[test]
    fn exact_placeholder_detection() {
        assert_eq!(as_placeholder("{{from}}"), Some("from"));
        assert_eq!(as_placeholder(" {{ a.b }} "), Some("a.b"));
        assert_eq!(as_placeholder("x {{from}}"), None);
    }
}
