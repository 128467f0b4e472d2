//! Render a structured query description into SQL text.
//!
//! The output is a [`BoundQuery`] in the same shape as a hand-written
//! stage query: literal values are bound as `$n` variables and values of
//! the form `{{name}}` are left as placeholders for the regular
//! substitution pass. Identifiers are validated, never quoted.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::bound_query::BoundQuery;
use crate::comparison::JoinRule;
use crate::error::CoreError;
use crate::fetch_config::{
    Condition, ConditionGroup, ConditionOperator, SortDirection, SqlBuilderParams,
};
use crate::placeholders::as_placeholder;

/// A plain or qualified identifier (`col`, `t.col`, `t.*`).
pub const IDENTIFIER_PATTERN: &str =
    r"^[A-Za-z_][A-Za-z0-9_]*(\.([A-Za-z_][A-Za-z0-9_]*|\*))?$";

/// A select item: `*`, an identifier, or `FN(identifier|*)`, optionally aliased.
pub const SELECT_ITEM_PATTERN: &str = concat!(
    r"(?i)^(\*|([A-Za-z_][A-Za-z0-9_]*\(\s*(DISTINCT\s+)?)?",
    r"([A-Za-z_][A-Za-z0-9_]*(\.([A-Za-z_][A-Za-z0-9_]*|\*))?|\*)(\s*\))?)",
    r"(\s+AS\s+[A-Za-z_][A-Za-z0-9_]*)?$",
);

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(IDENTIFIER_PATTERN).expect("valid regex"));

static SELECT_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(SELECT_ITEM_PATTERN).expect("valid regex"));

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a table, column or alias identifier.
pub fn validate_identifier(name: &str) -> Result<(), CoreError> {
    if IDENTIFIER_RE.is_match(name) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!("Invalid identifier: '{name}'")))
    }
}

fn validate_select_item(item: &str) -> Result<(), CoreError> {
    if SELECT_ITEM_RE.is_match(item.trim()) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!("Invalid select item: '{item}'")))
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Render the full `SELECT` statement.
pub fn render_select(params: &SqlBuilderParams) -> Result<BoundQuery, CoreError> {
    let mut query = BoundQuery::default();

    let select = if params.select.is_empty() {
        "*".to_string()
    } else {
        for item in &params.select {
            validate_select_item(item)?;
        }
        params
            .select
            .iter()
            .map(|s| s.trim())
            .collect::<Vec<_>>()
            .join(", ")
    };

    validate_identifier(&params.table)?;
    query.push_str(&format!("SELECT {select} FROM {}", params.table));
    if let Some(alias) = &params.alias {
        validate_identifier(alias)?;
        query.push_str(&format!(" AS {alias}"));
    }

    for join in &params.joins {
        validate_identifier(&join.table)?;
        query.push_str(&format!(" {} {}", join.kind.as_sql(), join.table));
        if let Some(alias) = &join.alias {
            validate_identifier(alias)?;
            query.push_str(&format!(" AS {alias}"));
        }
        if join.on.is_empty() {
            return Err(CoreError::Validation(format!(
                "Join on '{}' needs at least one condition",
                join.table
            )));
        }
        query.push_str(&format!(" ON {}", render_join_rules(&join.on)?));
    }

    if let Some(group) = non_empty(&params.where_clause) {
        let clause = render_conditions(group, &mut query)?;
        query.push_str(&format!(" WHERE {clause}"));
    }

    if !params.group_by.is_empty() {
        for field in &params.group_by {
            validate_identifier(field)?;
        }
        query.push_str(&format!(" GROUP BY {}", params.group_by.join(", ")));
    }

    if let Some(group) = non_empty(&params.having) {
        let clause = render_conditions(group, &mut query)?;
        query.push_str(&format!(" HAVING {clause}"));
    }

    if !params.order_by.is_empty() {
        let mut parts = Vec::with_capacity(params.order_by.len());
        for order in &params.order_by {
            validate_identifier(&order.field)?;
            let dir = match order.direction {
                SortDirection::Asc => "ASC",
                SortDirection::Desc => "DESC",
            };
            parts.push(format!("{} {dir}", order.field));
        }
        query.push_str(&format!(" ORDER BY {}", parts.join(", ")));
    }

    Ok(query)
}

fn non_empty(group: &Option<ConditionGroup>) -> Option<&ConditionGroup> {
    group.as_ref().filter(|g| !g.conditions.is_empty())
}

/// Render join rules with the same left-to-right accumulation the merge
/// stage uses, made explicit with parentheses.
pub fn render_join_rules(rules: &[JoinRule]) -> Result<String, CoreError> {
    let mut acc: Option<String> = None;
    for rule in rules {
        validate_identifier(&rule.left_ref)?;
        validate_identifier(&rule.right_ref)?;
        let term = format!("{} {} {}", rule.left_ref, rule.operator.as_sql(), rule.right_ref);
        acc = Some(match acc {
            None => term,
            Some(prev) => format!("({prev} {} {term})", rule.combinator.as_sql()),
        });
    }
    acc.ok_or_else(|| CoreError::Validation("Empty join rule list".into()))
}

fn render_conditions(group: &ConditionGroup, query: &mut BoundQuery) -> Result<String, CoreError> {
    let mut parts = Vec::with_capacity(group.conditions.len());
    for condition in &group.conditions {
        parts.push(render_condition(condition, query)?);
    }
    Ok(parts.join(&format!(" {} ", group.combinator.as_sql())))
}

fn render_condition(condition: &Condition, query: &mut BoundQuery) -> Result<String, CoreError> {
    validate_identifier(&condition.field)?;
    let field = &condition.field;

    let single = |query: &mut BoundQuery| -> Result<String, CoreError> {
        let value = condition.value.clone().ok_or_else(|| {
            CoreError::Validation(format!("Condition on '{field}' requires a value"))
        })?;
        Ok(value_text(value, query))
    };

    let text = match condition.operator {
        ConditionOperator::Eq => format!("{field} = {}", single(query)?),
        ConditionOperator::Ne => format!("{field} <> {}", single(query)?),
        ConditionOperator::Lt => format!("{field} < {}", single(query)?),
        ConditionOperator::Lte => format!("{field} <= {}", single(query)?),
        ConditionOperator::Gt => format!("{field} > {}", single(query)?),
        ConditionOperator::Gte => format!("{field} >= {}", single(query)?),
        ConditionOperator::Like => format!("{field} LIKE {}", single(query)?),
        ConditionOperator::NotLike => format!("{field} NOT LIKE {}", single(query)?),
        ConditionOperator::In | ConditionOperator::NotIn => {
            let keyword = if condition.operator == ConditionOperator::In {
                "IN"
            } else {
                "NOT IN"
            };
            let list = if condition.values.is_empty() {
                match condition.value.clone() {
                    Some(v) => value_text(v, query),
                    None => "NULL".to_string(),
                }
            } else {
                condition
                    .values
                    .iter()
                    .map(|v| value_text(v.clone(), query))
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            format!("{field} {keyword} ({list})")
        }
        ConditionOperator::IsNull => format!("{field} IS NULL"),
        ConditionOperator::IsNotNull => format!("{field} IS NOT NULL"),
    };
    Ok(text)
}

/// Placeholder strings stay textual; anything else is bound.
fn value_text(value: Value, query: &mut BoundQuery) -> String {
    if let Value::String(s) = &value {
        if let Some(name) = as_placeholder(s) {
            return format!("{{{{{name}}}}}");
        }
    }
    query.bind(value)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn params(v: Value) -> SqlBuilderParams {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn defaults_to_select_star() {
        let q = render_select(&params(json!({"dataSourceId": 1, "table": "users"}))).unwrap();
        assert_eq!(q.sql, "SELECT * FROM users");
        assert!(q.variables.is_empty());
    }

    #[test]
    fn renders_every_clause_in_order() {
        let q = render_select(&params(json!({
            "dataSourceId": 1,
            "table": "orders", "alias": "o",
            "select": ["o.user_id", "COUNT(*) AS n"],
            "joins": [{"type": "left", "table": "users", "alias": "u",
                       "on": [{"leftRef": "o.user_id", "rightRef": "u.id", "operator": "="}]}],
            "where": {"combinator": "and", "conditions": [
                {"field": "o.status", "operator": "in", "values": ["new", "paid"]},
                {"field": "o.created_at", "operator": ">=", "value": "{{from}}"},
                {"field": "u.deleted_at", "operator": "is_null"}
            ]},
            "groupBy": ["o.user_id"],
            "having": {"conditions": [{"field": "n", "operator": ">", "value": 2}]},
            "orderBy": [{"field": "n", "direction": "desc"}]
        })))
        .unwrap();

        assert_eq!(
            q.sql,
            "SELECT o.user_id, COUNT(*) AS n FROM orders AS o \
             LEFT JOIN users AS u ON o.user_id = u.id \
             WHERE o.status IN ($1, $2) AND o.created_at >= {{from}} AND u.deleted_at IS NULL \
             GROUP BY o.user_id HAVING n > $3 ORDER BY n DESC"
        );
        assert_eq!(q.variables, vec![json!("new"), json!("paid"), json!(2)]);
    }

    #[test]
    fn join_rules_accumulate_left_to_right() {
        let rules: Vec<JoinRule> = serde_json::from_value(json!([
            {"leftRef": "a.x", "rightRef": "b.x", "operator": "="},
            {"leftRef": "a.y", "rightRef": "b.y", "operator": "=", "combinator": "or"},
            {"leftRef": "a.z", "rightRef": "b.z", "operator": "!=", "combinator": "and"}
        ]))
        .unwrap();
        assert_eq!(
            render_join_rules(&rules).unwrap(),
            "((a.x = b.x OR a.y = b.y) AND a.z <> b.z)"
        );
    }

    #[test]
    fn rejects_unsafe_identifiers() {
        let err = render_select(&params(json!({
            "dataSourceId": 1, "table": "users; DROP TABLE x"
        })));
        assert_matches!(err, Err(CoreError::Validation(_)));

        let err = render_select(&params(json!({
            "dataSourceId": 1, "table": "users", "select": ["id) FROM secrets --"]
        })));
        assert_matches!(err, Err(CoreError::Validation(_)));
    }

    #[test]
    fn binary_condition_needs_value() {
        let err = render_select(&params(json!({
            "dataSourceId": 1, "table": "users",
            "where": {"conditions": [{"field": "id", "operator": "="}]}
        })));
        assert_matches!(err, Err(CoreError::Validation(msg)) if msg.contains("requires a value"));
    }

    #[test]
    fn in_with_placeholder_value_expands_later() {
        let q = render_select(&params(json!({
            "dataSourceId": 1, "table": "orders",
            "where": {"conditions": [
                {"field": "user_id", "operator": "in", "value": "{{users.id}}"}
            ]}
        })))
        .unwrap();
        assert_eq!(q.sql, "SELECT * FROM orders WHERE user_id IN ({{users.id}})");
    }
}
