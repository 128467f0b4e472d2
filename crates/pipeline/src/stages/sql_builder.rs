//! Structured query builder stage: render, then page like direct SQL.

use ferry_core::dataset::FetchConfigResult;
use ferry_core::fetch_config::SqlBuilderParams;
use ferry_core::query_builder::render_select;

use super::sql::{paged, PagedQuery};
use super::{single, ResultStream};
use crate::context::StageContext;
use crate::error::PipelineError;

pub(crate) fn run(
    stage: String,
    params: SqlBuilderParams,
    priors: Vec<FetchConfigResult>,
    ctx: StageContext,
) -> ResultStream {
    let query = match render_select(&params) {
        Ok(query) => query,
        Err(e) => return single(Err(PipelineError::InvalidConfig(e.to_string()))),
    };
    tracing::debug!(stage = %stage, sql = %query.sql, "Rendered builder query");

    paged(
        PagedQuery {
            stage,
            data_source_id: params.data_source_id,
            query,
            params: params.params,
            page: params.page,
        },
        priors,
        ctx,
    )
}
