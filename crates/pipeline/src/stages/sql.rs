//! Direct SQL stage, and the paging path the builder stage shares.

use futures::stream::{self, StreamExt};
use serde_json::Value;

use ferry_core::bound_query::BoundQuery;
use ferry_core::dataset::{collect_params, find_dataset, ArrayColumns, FetchConfigResult};
use ferry_core::fetch_config::SqlParams;
use ferry_core::params::{resolve_params, Param};
use ferry_core::placeholders::{substitute, PlaceholderValue};
use ferry_core::types::DbId;

use super::ResultStream;
use crate::context::{SourceConnection, StageContext};
use crate::error::PipelineError;

/// Rows fetched per page.
pub const PAGE_SIZE: i64 = 100;

pub(crate) fn run(
    stage: String,
    params: SqlParams,
    priors: Vec<FetchConfigResult>,
    ctx: StageContext,
) -> ResultStream {
    paged(
        PagedQuery {
            stage,
            data_source_id: params.data_source_id,
            query: BoundQuery::new(params.query),
            params: params.params,
            page: params.page,
        },
        priors,
        ctx,
    )
}

/// A query still carrying its `{{...}}` placeholders.
pub(crate) struct PagedQuery {
    pub stage: String,
    pub data_source_id: DbId,
    pub query: BoundQuery,
    pub params: Vec<Param>,
    pub page: Option<u32>,
}

/// Counted, substituted query with the page range left to fetch.
struct Plan {
    stage: String,
    source: SourceConnection,
    query: BoundQuery,
    total_pages: i64,
    next: i64,
    last: i64,
    explicit: bool,
    ctx: StageContext,
}

enum State {
    Start(Box<(PagedQuery, Vec<FetchConfigResult>, StageContext)>),
    Paging(Box<Plan>),
    Done,
}

/// Count, then yield the requested page or every page in order.
pub(crate) fn paged(
    query: PagedQuery,
    priors: Vec<FetchConfigResult>,
    ctx: StageContext,
) -> ResultStream {
    let start = State::Start(Box::new((query, priors, ctx)));
    stream::unfold(start, |mut state| async move {
        loop {
            state = match state {
                State::Done => return None,
                State::Start(start) => {
                    let (query, priors, ctx) = *start;
                    match prepare(query, &priors, ctx).await {
                        Ok(plan) => State::Paging(Box::new(plan)),
                        Err(e) => return Some((Err(e), State::Done)),
                    }
                }
                State::Paging(mut plan) => {
                    if plan.next > plan.last {
                        return None;
                    }
                    let page = plan.next;
                    plan.next += 1;
                    let item = fetch_page(&plan, page).await;
                    let next = if item.is_ok() {
                        State::Paging(plan)
                    } else {
                        State::Done
                    };
                    return Some((item, next));
                }
            };
        }
    })
    .boxed()
}

async fn prepare(
    paged: PagedQuery,
    priors: &[FetchConfigResult],
    ctx: StageContext,
) -> Result<Plan, PipelineError> {
    let source = ctx.source(paged.data_source_id)?.clone();

    let mut values = collect_params(priors);
    let own =
        resolve_params(&paged.params, ctx.now).map_err(|e| PipelineError::Param(e.to_string()))?;
    values.extend(own);

    let query = substitute(paged.query, |name| lookup(name, &values, priors))
        .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;

    let total_rows = ctx
        .adapter
        .count(source.backend, &source.config, &query)
        .await?;
    let total_pages = (total_rows.max(0) + PAGE_SIZE - 1) / PAGE_SIZE;

    let (next, last, explicit) = match paged.page {
        Some(0) => {
            return Err(PipelineError::InvalidConfig(format!(
                "Stage '{}' requests page 0; pages start at 1",
                paged.stage
            )))
        }
        Some(_) if total_rows == 0 => (1, 0, true),
        Some(page) => (i64::from(page), i64::from(page), true),
        None => (1, total_pages, false),
    };

    tracing::debug!(
        stage = %paged.stage,
        data_source_id = paged.data_source_id,
        total_rows,
        total_pages,
        "Counted stage rows",
    );

    Ok(Plan {
        stage: paged.stage,
        source,
        query,
        total_pages,
        next,
        last,
        explicit,
        ctx,
    })
}

/// Stage parameters first, then `{{dataset.column}}` references.
fn lookup(
    name: &str,
    values: &serde_json::Map<String, Value>,
    priors: &[FetchConfigResult],
) -> Option<PlaceholderValue> {
    if let Some(value) = values.get(name) {
        return Some(PlaceholderValue::Scalar(value.clone()));
    }
    let (dataset_id, column) = name.rsplit_once('.')?;
    let dataset = find_dataset(priors, dataset_id)?;
    Some(PlaceholderValue::List(dataset.column_values(column)))
}

async fn fetch_page(plan: &Plan, page: i64) -> Result<FetchConfigResult, PipelineError> {
    let offset = (page - 1) * PAGE_SIZE;
    let result = plan
        .ctx
        .adapter
        .execute(
            plan.source.backend,
            &plan.source.config,
            &plan.query,
            Some(PAGE_SIZE),
            Some(offset),
        )
        .await?;

    let progress = (!plan.explicit).then(|| page_progress(page, plan.total_pages));
    tracing::debug!(stage = %plan.stage, page, rows = result.rows.len(), "Fetched page");

    Ok(FetchConfigResult::ArrayColumns(ArrayColumns {
        dataset_id: plan.stage.clone(),
        columns: result.columns,
        rows: result.rows,
        count: Some(plan.total_pages),
        progress,
    }))
}

fn page_progress(page: i64, total_pages: i64) -> u8 {
    if total_pages <= 0 {
        return 100;
    }
    let percent = (page as f64 / total_pages as f64 * 100.0).round();
    percent.clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn progress_rounds_per_page() {
        assert_eq!(page_progress(1, 3), 33);
        assert_eq!(page_progress(2, 3), 67);
        assert_eq!(page_progress(3, 3), 100);
        assert_eq!(page_progress(1, 1), 100);
    }

    #[test]
    fn lookup_prefers_params_over_datasets() {
        let priors = vec![FetchConfigResult::ArrayColumns(ArrayColumns {
            dataset_id: "users".into(),
            columns: vec!["id".into()],
            rows: vec![
                json!({"id": 1}).as_object().unwrap().clone(),
                json!({"id": 2}).as_object().unwrap().clone(),
            ],
            ..Default::default()
        })];
        let mut values = serde_json::Map::new();
        values.insert("users.id".into(), json!("override"));

        assert_eq!(
            lookup("users.id", &values, &priors),
            Some(PlaceholderValue::Scalar(json!("override")))
        );
        assert_eq!(
            lookup("users.id", &serde_json::Map::new(), &priors),
            Some(PlaceholderValue::List(vec![json!(1), json!(2)]))
        );
        assert_eq!(lookup("orders.id", &serde_json::Map::new(), &priors), None);
        assert_eq!(lookup("plain", &serde_json::Map::new(), &priors), None);
    }
}
