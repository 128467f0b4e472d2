//! Row comparison model shared by the merge stage and builder joins.
//!
//! A rule list is evaluated strictly left to right: the first rule seeds
//! the accumulator and every later rule folds into it with its own
//! combinator. There is no `and`-binds-tighter precedence.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dataset::Row;

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

/// Binary comparison between two row values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOperator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
}

impl ComparisonOperator {
    /// SQL spelling of the operator.
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
        }
    }
}

/// Boolean connective folding a rule into the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combinator {
    #[default]
    And,
    Or,
}

impl Combinator {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }

    pub fn apply(self, acc: bool, next: bool) -> bool {
        match self {
            Self::And => acc && next,
            Self::Or => acc || next,
        }
    }
}

/// One `leftRef <op> rightRef` rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRule {
    pub left_ref: String,
    pub right_ref: String,
    pub operator: ComparisonOperator,
    #[serde(default)]
    pub combinator: Combinator,
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Resolve a column reference against a row.
///
/// A dotted reference `x.y` looks up key `y` only; the qualifier is ignored.
pub fn resolve_ref<'a>(row: &'a Row, reference: &str) -> &'a Value {
    let key = reference.rsplit('.').next().unwrap_or(reference);
    row.get(key).unwrap_or(&Value::Null)
}

/// Compare two values with the given operator.
///
/// Numbers (and numeric strings) compare numerically, other strings
/// lexically. `Null` equals only `Null`; ordering against `Null` is false.
pub fn compare(op: ComparisonOperator, left: &Value, right: &Value) -> bool {
    if left.is_null() || right.is_null() {
        let both = left.is_null() && right.is_null();
        return match op {
            ComparisonOperator::Eq => both,
            ComparisonOperator::Ne => !both,
            _ => false,
        };
    }

    let ordering = match (as_number(left), as_number(right)) {
        (Some(l), Some(r)) => l.partial_cmp(&r),
        _ => Some(as_text(left).cmp(&as_text(right))),
    };

    match (op, ordering) {
        (ComparisonOperator::Eq, Some(o)) => o == Ordering::Equal,
        (ComparisonOperator::Ne, Some(o)) => o != Ordering::Equal,
        (ComparisonOperator::Lt, Some(o)) => o == Ordering::Less,
        (ComparisonOperator::Lte, Some(o)) => o != Ordering::Greater,
        (ComparisonOperator::Gt, Some(o)) => o == Ordering::Greater,
        (ComparisonOperator::Gte, Some(o)) => o != Ordering::Less,
        // NaN involved.
        (ComparisonOperator::Ne, None) => true,
        (_, None) => false,
    }
}

/// Fold `(result, combinator)` pairs left to right.
///
/// The first pair's combinator is ignored; an empty list is `false`.
pub fn accumulate<I>(results: I) -> bool
where
    I: IntoIterator<Item = (bool, Combinator)>,
{
    let mut iter = results.into_iter();
    let Some((mut acc, _)) = iter.next() else {
        return false;
    };
    for (value, combinator) in iter {
        acc = combinator.apply(acc, value);
    }
    acc
}

/// Whether a left/right row pair satisfies the rule list.
pub fn rows_match(rules: &[JoinRule], left: &Row, right: &Row) -> bool {
    accumulate(rules.iter().map(|rule| {
        let l = resolve_ref(left, &rule.left_ref);
        let r = resolve_ref(right, &rule.right_ref);
        (compare(rule.operator, l, r), rule.combinator)
    }))
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
