//! Fetch-config definitions: the typed stages of a migration pipeline.
//!
//! A migration stores an ordered list of [`FetchConfig`]s. The order is a
//! strict pipeline: each stage sees every result produced before it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::comparison::{Combinator, JoinRule};
use crate::error::CoreError;
use crate::params::Param;
use crate::types::DbId;

// ---------------------------------------------------------------------------
// FetchConfig
// ---------------------------------------------------------------------------

/// One typed pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FetchConfig {
    Sql { id: String, params: SqlParams },
    SqlBuilder { id: String, params: SqlBuilderParams },
    Merge { id: String, params: MergeParams },
    Modification { id: String, params: ModificationParams },
}

/// Discriminant of a [`FetchConfig`], used for dispatch and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchConfigKind {
    Sql,
    SqlBuilder,
    Merge,
    Modification,
}

impl FetchConfigKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sql => "sql",
            Self::SqlBuilder => "sql_builder",
            Self::Merge => "merge",
            Self::Modification => "modification",
        }
    }
}

impl std::fmt::Display for FetchConfigKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FetchConfig {
    /// The stage id; also the dataset id of the results it produces.
    pub fn id(&self) -> &str {
        match self {
            Self::Sql { id, .. }
            | Self::SqlBuilder { id, .. }
            | Self::Merge { id, .. }
            | Self::Modification { id, .. } => id,
        }
    }

    pub fn kind(&self) -> FetchConfigKind {
        match self {
            Self::Sql { .. } => FetchConfigKind::Sql,
            Self::SqlBuilder { .. } => FetchConfigKind::SqlBuilder,
            Self::Merge { .. } => FetchConfigKind::Merge,
            Self::Modification { .. } => FetchConfigKind::Modification,
        }
    }

    /// Data sources queried by this stage.
    pub fn data_source_id(&self) -> Option<DbId> {
        match self {
            Self::Sql { params, .. } => Some(params.data_source_id),
            Self::SqlBuilder { params, .. } => Some(params.data_source_id),
            Self::Merge { .. } | Self::Modification { .. } => None,
        }
    }
}

/// Parse and check a stored fetch-config list.
///
/// Stage ids must be non-empty and unique so dataset references are
/// unambiguous.
pub fn parse_fetch_configs(value: &Value) -> Result<Vec<FetchConfig>, CoreError> {
    let configs: Vec<FetchConfig> = serde_json::from_value(value.clone())
        .map_err(|e| CoreError::Validation(format!("Invalid fetch configs: {e}")))?;

    let mut seen = std::collections::HashSet::new();
    for config in &configs {
        let id = config.id();
        if id.trim().is_empty() {
            return Err(CoreError::Validation("Fetch config id must not be empty".into()));
        }
        if !seen.insert(id) {
            return Err(CoreError::Validation(format!("Duplicate fetch config id '{id}'")));
        }
    }
    Ok(configs)
}

// ---------------------------------------------------------------------------
// Direct SQL
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlParams {
    pub data_source_id: DbId,
    pub query: String,
    #[serde(default)]
    pub params: Vec<Param>,
    /// 1-based page to fetch; all pages when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

// ---------------------------------------------------------------------------
// Structured query builder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlBuilderParams {
    pub data_source_id: DbId,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Select list; `*` when empty.
    #[serde(default)]
    pub select: Vec<String>,
    #[serde(default)]
    pub joins: Vec<JoinClause>,
    #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<ConditionGroup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub having: Option<ConditionGroup>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinKind {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
            Self::Right => "RIGHT JOIN",
            Self::Full => "FULL JOIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinClause {
    #[serde(rename = "type")]
    pub kind: JoinKind,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub on: Vec<JoinRule>,
}

/// Conditions combined with one boolean connective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionGroup {
    #[serde(default)]
    pub combinator: Combinator,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOperator {
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
    #[serde(rename = "like")]
    Like,
    #[serde(rename = "not_like")]
    NotLike,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not_in")]
    NotIn,
    #[serde(rename = "is_null")]
    IsNull,
    #[serde(rename = "is_not_null")]
    IsNotNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeParams {
    pub left_dataset_id: String,
    pub right_dataset_id: String,
    pub rules: Vec<JoinRule>,
}

// ---------------------------------------------------------------------------
// Modification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModificationParams {
    pub dataset_id: String,
    #[serde(default)]
    pub new_columns: Vec<NewColumn>,
    #[serde(default)]
    pub drop_columns: Vec<String>,
    /// Old name -> new name.
    #[serde(default)]
    pub rename_columns: BTreeMap<String, String>,
}

/// A computed column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewColumn {
    pub key: String,
    #[serde(flatten)]
    pub value: ColumnValue,
}

/// How a computed column's value is produced from the source row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ColumnValue {
    /// A fixed value.
    Literal { value: Value },
    /// Arithmetic over column identifiers, e.g. `price * qty`.
    Expression { value: String },
    /// Text with `{column}` tokens, evaluated as arithmetic when the
    /// template itself contains an operator.
    Template { value: String },
    /// Another column of the same row.
    Column { value: String },
    /// A named function over nested values.
    Function { name: String, args: Vec<ColumnValue> },
}
