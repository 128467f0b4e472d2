//! Where a migration writes its final datasets.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bound_query::BoundQuery;
use crate::dataset::{ArrayColumns, Row};
use crate::error::CoreError;
use crate::query_builder::validate_identifier;
use crate::types::DbId;

/// Copy final pipeline rows into a table of a data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveMapping {
    /// Only results of this dataset are written; every final result when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<String>,
    pub data_source_id: DbId,
    pub table: String,
    pub columns: Vec<ColumnMapping>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    /// Key in the dataset row.
    pub source: String,
    /// Column of the target table.
    pub target: String,
}

impl SaveMapping {
    pub fn applies_to(&self, dataset: &ArrayColumns) -> bool {
        self.dataset_id
            .as_deref()
            .map_or(true, |id| id == dataset.dataset_id)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        validate_identifier(&self.table)?;
        if self.columns.is_empty() {
            return Err(CoreError::Validation(format!(
                "Save mapping for '{}' has no columns",
                self.table
            )));
        }
        for column in &self.columns {
            validate_identifier(&column.target)?;
        }
        Ok(())
    }

    /// Multi-row `INSERT`s for `rows`, each binding at most `max_variables`
    /// values. Empty when there is nothing to write.
    pub fn render_inserts(
        &self,
        rows: &[Row],
        max_variables: usize,
    ) -> Result<Vec<BoundQuery>, CoreError> {
        self.validate()?;
        let per_statement = (max_variables / self.columns.len()).max(1);
        let mut statements = Vec::with_capacity(rows.len().div_ceil(per_statement));
        for batch in rows.chunks(per_statement) {
            statements.extend(self.render_insert(batch)?);
        }
        Ok(statements)
    }

    /// One multi-row `INSERT` for `rows`, or `None` when there is nothing to write.
    ///
    /// Missing source keys are written as `NULL`.
    pub fn render_insert(&self, rows: &[Row]) -> Result<Option<BoundQuery>, CoreError> {
        self.validate()?;
        if rows.is_empty() {
            return Ok(None);
        }

        let targets: Vec<&str> = self.columns.iter().map(|c| c.target.as_str()).collect();
        let mut query = BoundQuery::new(format!(
            "INSERT INTO {} ({}) VALUES ",
            self.table,
            targets.join(", ")
        ));

        for (i, row) in rows.iter().enumerate() {
            if i > 0 {
                query.push_str(", ");
            }
            let values = self
                .columns
                .iter()
                .map(|c| row.get(&c.source).cloned().unwrap_or(Value::Null));
            let markers = query.bind_list(values);
            query.push_str(&format!("({markers})"));
        }
        Ok(Some(query))
    }
}

/// Parse a migration's stored save-mapping list.
pub fn parse_save_mappings(value: &Value) -> Result<Vec<SaveMapping>, CoreError> {
    let mappings: Vec<SaveMapping> = serde_json::from_value(value.clone())
        .map_err(|e| CoreError::Validation(format!("Invalid save mappings: {e}")))?;
    for mapping in &mappings {
        mapping.validate()?;
    }
    Ok(mappings)
}
