//! Stage executors, one per fetch-config kind.
//!
//! Every executor returns a [`ResultStream`]. SQL stages yield one result
//! per page; merge and modification stages yield exactly one.

pub mod merge;
pub mod modification;
pub mod sql;
pub mod sql_builder;

use futures::future;
use futures::stream::{self, BoxStream, StreamExt};

use ferry_core::dataset::{find_dataset, ArrayColumns, FetchConfigResult};
use ferry_core::fetch_config::FetchConfig;

use crate::context::StageContext;
use crate::error::PipelineError;

/// Lazily produced results of one stage.
pub type ResultStream = BoxStream<'static, Result<FetchConfigResult, PipelineError>>;

/// Run `config` against the results produced before it.
pub fn dispatch(
    config: &FetchConfig,
    priors: Vec<FetchConfigResult>,
    ctx: &StageContext,
) -> ResultStream {
    tracing::debug!(
        stage = %config.id(),
        kind = %config.kind(),
        priors = priors.len(),
        "Dispatching stage"
    );
    match config {
        FetchConfig::Sql { id, params } => {
            sql::run(id.clone(), params.clone(), priors, ctx.clone())
        }
        FetchConfig::SqlBuilder { id, params } => {
            sql_builder::run(id.clone(), params.clone(), priors, ctx.clone())
        }
        FetchConfig::Merge { id, params } => single(merge::run(id, params, &priors)),
        FetchConfig::Modification { id, params } => single(modification::run(id, params, &priors)),
    }
}

pub(crate) fn single(result: Result<FetchConfigResult, PipelineError>) -> ResultStream {
    stream::once(future::ready(result)).boxed()
}

/// The latest prior dataset named `dataset_id`.
pub(crate) fn referenced<'a>(
    stage: &str,
    priors: &'a [FetchConfigResult],
    dataset_id: &str,
) -> Result<&'a ArrayColumns, PipelineError> {
    find_dataset(priors, dataset_id).ok_or_else(|| PipelineError::ConfigReference {
        stage: stage.to_string(),
        dataset_id: dataset_id.to_string(),
    })
}
