//! Writing final pipeline results into their target tables.

use ferry_core::dataset::FetchConfigResult;
use ferry_core::save_mapping::SaveMapping;

use crate::context::StageContext;
use crate::error::PipelineError;

/// Applies a migration's save mappings to each final result.
#[derive(Debug, Clone, Default)]
pub struct SaveWriter {
    mappings: Vec<SaveMapping>,
}

impl SaveWriter {
    pub fn new(mappings: Vec<SaveMapping>) -> Self {
        Self { mappings }
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Insert `result`'s rows through every mapping that applies to it.
    ///
    /// Returns the number of rows written across all targets. Params
    /// results and empty datasets write nothing.
    pub async fn write(
        &self,
        result: &FetchConfigResult,
        ctx: &StageContext,
    ) -> Result<u64, PipelineError> {
        let Some(dataset) = result.as_array_columns() else {
            return Ok(0);
        };

        let mut written = 0;
        for mapping in self.mappings.iter().filter(|m| m.applies_to(dataset)) {
            if dataset.rows.is_empty() {
                continue;
            }
            let target = ctx.source(mapping.data_source_id)?;
            let inserts =
                mapping.render_inserts(&dataset.rows, target.backend.max_bind_variables())?;
            let mut affected = 0;
            for insert in &inserts {
                affected += ctx
                    .adapter
                    .execute_statement(target.backend, &target.config, insert)
                    .await?;
            }
            tracing::debug!(
                dataset_id = %dataset.dataset_id,
                table = %mapping.table,
                data_source_id = mapping.data_source_id,
                rows = affected,
                statements = inserts.len(),
                "Saved dataset rows",
            );
            written += affected;
        }
        Ok(written)
    }
}
