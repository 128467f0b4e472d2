//! Merge stage: nested-loop join of two prior datasets.

use ferry_core::comparison::rows_match;
use ferry_core::dataset::{ArrayColumns, FetchConfigResult, Row};
use ferry_core::fetch_config::MergeParams;

use super::referenced;
use crate::error::PipelineError;

pub(crate) fn run(
    stage: &str,
    params: &MergeParams,
    priors: &[FetchConfigResult],
) -> Result<FetchConfigResult, PipelineError> {
    let left = referenced(stage, priors, &params.left_dataset_id)?;
    let right = referenced(stage, priors, &params.right_dataset_id)?;

    let columns = prefixed(left)
        .chain(prefixed(right))
        .collect::<Vec<_>>();

    let mut rows = Vec::new();
    for l in &left.rows {
        for r in &right.rows {
            if rows_match(&params.rules, l, r) {
                rows.push(merge_pair(left, l, right, r));
            }
        }
    }

    tracing::debug!(
        stage,
        left = left.rows.len(),
        right = right.rows.len(),
        matched = rows.len(),
        "Merged datasets",
    );

    Ok(FetchConfigResult::ArrayColumns(ArrayColumns {
        dataset_id: stage.to_string(),
        columns,
        rows,
        count: None,
        progress: None,
    }))
}

fn prefixed(dataset: &ArrayColumns) -> impl Iterator<Item = String> + '_ {
    dataset
        .columns
        .iter()
        .map(move |c| format!("{}.{c}", dataset.dataset_id))
}

fn merge_pair(left: &ArrayColumns, l: &Row, right: &ArrayColumns, r: &Row) -> Row {
    let mut out = Row::with_capacity(l.len() + r.len());
    for (key, value) in l {
        out.insert(format!("{}.{key}", left.dataset_id), value.clone());
    }
    for (key, value) in r {
        out.insert(format!("{}.{key}", right.dataset_id), value.clone());
    }
    out
}
