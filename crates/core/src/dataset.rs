//! Datasets flowing between pipeline stages.
//!
//! Every stage consumes the accumulated [`FetchConfigResult`]s produced
//! before it and yields new ones. Rows are column-keyed JSON objects; the
//! separate `columns` list carries the column order.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One dataset row keyed by column name.
pub type Row = serde_json::Map<String, Value>;

/// The unit flowing between pipeline stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FetchConfigResult {
    /// A named dataset snapshot.
    ArrayColumns(ArrayColumns),
    /// A flat set of named values usable as query placeholders.
    Params { data: serde_json::Map<String, Value> },
}

/// A dataset snapshot: ordered column names plus rows.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayColumns {
    pub dataset_id: String,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    /// Total page count for paginated stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
    /// Completion percentage of the stage that produced this page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
}

impl ArrayColumns {
    /// Values of `column` across all rows, `Null` where the key is absent.
    pub fn column_values(&self, column: &str) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| row.get(column).cloned().unwrap_or(Value::Null))
            .collect()
    }
}

impl FetchConfigResult {
    pub fn as_array_columns(&self) -> Option<&ArrayColumns> {
        match self {
            Self::ArrayColumns(ds) => Some(ds),
            Self::Params { .. } => None,
        }
    }

    /// Progress reported by the producing stage. `Params` results and
    /// single-shot stages count as complete.
    pub fn progress(&self) -> u8 {
        match self {
            Self::ArrayColumns(ds) => ds.progress.unwrap_or(100),
            Self::Params { .. } => 100,
        }
    }
}

/// Find the most recent ArrayColumns result with the given dataset id.
pub fn find_dataset<'a>(
    results: &'a [FetchConfigResult],
    dataset_id: &str,
) -> Option<&'a ArrayColumns> {
    results
        .iter()
        .rev()
        .filter_map(FetchConfigResult::as_array_columns)
        .find(|ds| ds.dataset_id == dataset_id)
}

/// Merge every `Params` result in order; later entries win.
pub fn collect_params(results: &[FetchConfigResult]) -> serde_json::Map<String, Value> {
    let mut merged = serde_json::Map::new();
    for result in results {
        if let FetchConfigResult::Params { data } = result {
            for (k, v) in data {
                merged.insert(k.clone(), v.clone());
            }
        }
    }
    merged
}

/// Union of row keys in first-seen order.
pub fn union_columns(rows: &[Row]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}
