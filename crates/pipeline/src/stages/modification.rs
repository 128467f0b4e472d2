//! Modification stage: derive, drop and rename columns of one dataset.
//!
//! For every row, all new columns are computed from the *original* row,
//! then drops apply, then renames. The input dataset is left untouched.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use ferry_core::dataset::{ArrayColumns, FetchConfigResult, Row};
use ferry_core::expression::{evaluate, number_value, to_number, to_text};
use ferry_core::fetch_config::{ColumnValue, ModificationParams};

use super::referenced;
use crate::error::PipelineError;

/// `{column}` tokens inside a template.
static TEMPLATE_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_.\-]*)\}").expect("valid regex")
});

/// Characters that make a substituted template worth evaluating.
const ARITHMETIC_CHARS: &[char] = &['+', '-', '*', '/', '%', '(', ')'];

pub(crate) fn run(
    stage: &str,
    params: &ModificationParams,
    priors: &[FetchConfigResult],
) -> Result<FetchConfigResult, PipelineError> {
    let input = referenced(stage, priors, &params.dataset_id)?;

    let rows = input
        .rows
        .iter()
        .map(|row| modify_row(params, row))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(FetchConfigResult::ArrayColumns(ArrayColumns {
        dataset_id: stage.to_string(),
        columns: output_columns(params, &input.columns),
        rows,
        count: None,
        progress: None,
    }))
}

fn modify_row(params: &ModificationParams, row: &Row) -> Result<Row, PipelineError> {
    let computed = params
        .new_columns
        .iter()
        .map(|column| {
            column_value(&column.value, row)
                .map(|value| (column.key.clone(), value))
                .map_err(|message| PipelineError::Expression {
                    column: column.key.clone(),
                    message,
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut extended = row.clone();
    extended.extend(computed);

    Ok(reshape(extended, &params.drop_columns, &params.rename_columns))
}

fn reshape(row: Row, drop: &[String], rename: &BTreeMap<String, String>) -> Row {
    row.into_iter()
        .filter(|(key, _)| !drop.contains(key))
        .map(|(key, value)| match rename.get(&key) {
            Some(to) => (to.clone(), value),
            None => (key, value),
        })
        .collect()
}

fn output_columns(params: &ModificationParams, input: &[String]) -> Vec<String> {
    let mut columns = input.to_vec();
    for column in &params.new_columns {
        if !columns.contains(&column.key) {
            columns.push(column.key.clone());
        }
    }

    let mut out: Vec<String> = Vec::with_capacity(columns.len());
    for column in columns {
        if params.drop_columns.contains(&column) {
            continue;
        }
        let name = params.rename_columns.get(&column).cloned().unwrap_or(column);
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Column values
// ---------------------------------------------------------------------------

fn column_value(value: &ColumnValue, row: &Row) -> Result<Value, String> {
    match value {
        ColumnValue::Literal { value } => Ok(value.clone()),
        ColumnValue::Column { value } => Ok(row.get(value).cloned().unwrap_or(Value::Null)),
        ColumnValue::Expression { value } => {
            evaluate(value, |name| row.get(name).cloned()).map_err(|e| e.to_string())
        }
        ColumnValue::Template { value } => Ok(render_template(value, row)),
        ColumnValue::Function { name, args } => {
            let args = args
                .iter()
                .map(|arg| column_value(arg, row))
                .collect::<Result<Vec<_>, _>>()?;
            apply_function(name, &args)
        }
    }
}

/// Substitute `{column}` tokens, then evaluate the text as arithmetic when
/// it parses as an expression. Anything else stays text.
fn render_template(template: &str, row: &Row) -> Value {
    let rendered = TEMPLATE_TOKEN_RE.replace_all(template, |caps: &regex::Captures| {
        row.get(&caps[1]).map(to_text).unwrap_or_default()
    });

    if is_arithmetic(template) {
        if let Ok(value) = evaluate(&rendered, |_| None) {
            return value;
        }
    }
    Value::String(rendered.into_owned())
}

/// Operators in the literal text, and no two tokens glued by a bare `-` or
/// `/`: `{y}-{m}-{d}` and `{sku}/{n}` join values, they do not compute.
fn is_arithmetic(template: &str) -> bool {
    let literal = TEMPLATE_TOKEN_RE.replace_all(template, "");
    if !literal.contains(ARITHMETIC_CHARS) {
        return false;
    }
    let tokens: Vec<_> = TEMPLATE_TOKEN_RE.find_iter(template).collect();
    !tokens
        .windows(2)
        .any(|pair| matches!(&template[pair[0].end()..pair[1].start()], "-" | "/"))
}

fn apply_function(name: &str, args: &[Value]) -> Result<Value, String> {
    let text = |i: usize| args.get(i).map(to_text).unwrap_or_default();
    let number = |i: usize| {
        args.get(i)
            .and_then(to_number)
            .ok_or_else(|| format!("{name}() expects a number as argument {}", i + 1))
    };
    let map_text = |f: fn(&str) -> String| match args.first() {
        None | Some(Value::Null) => Value::Null,
        Some(v) => Value::String(f(&to_text(v))),
    };

    let value = match name.to_ascii_lowercase().as_str() {
        "upper" => map_text(|s| s.to_uppercase()),
        "lower" => map_text(|s| s.to_lowercase()),
        "trim" => map_text(|s| s.trim().to_string()),
        "length" => match args.first() {
            None | Some(Value::Null) => Value::Null,
            Some(v) => Value::from(to_text(v).chars().count()),
        },
        "concat" => Value::String(args.iter().map(to_text).collect()),
        "coalesce" => args
            .iter()
            .find(|v| !v.is_null())
            .cloned()
            .unwrap_or(Value::Null),
        "abs" => number_value(number(0)?.abs()),
        "round" => {
            let digits = if args.len() > 1 { number(1)? as i32 } else { 0 };
            let factor = 10f64.powi(digits);
            number_value((number(0)? * factor).round() / factor)
        }
        "replace" => {
            let from = text(1);
            if from.is_empty() {
                Value::String(text(0))
            } else {
                Value::String(text(0).replace(&from, &text(2)))
            }
        }
        // substring(text, start, length?) with a zero-based start.
        "substring" => {
            let start = number(1)?.max(0.0) as usize;
            let source = text(0);
            let chars = source.chars().skip(start);
            let picked: String = if args.len() > 2 {
                chars.take(number(2)?.max(0.0) as usize).collect()
            } else {
                chars.collect()
            };
            Value::String(picked)
        }
        other => return Err(format!("Unknown function '{other}'")),
    };
    Ok(value)
}
