//! Chaining stages into one lazy result stream.
//!
//! Every result a stage yields re-runs the rest of the chain with that
//! result appended to the priors; only results of the last stage reach the
//! caller. A paginated SQL stage therefore drives its downstream stages
//! once per page. The walk is depth-first over an explicit stack of stage
//! streams, so output order matches a nested-loop reading of the chain.

use futures::stream::{self, BoxStream, StreamExt};

use ferry_core::dataset::FetchConfigResult;
use ferry_core::fetch_config::FetchConfig;

use crate::context::StageContext;
use crate::error::PipelineError;
use crate::stages::{dispatch, ResultStream};

/// A final result and the progress of every stage on the path to it.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineYield {
    pub result: FetchConfigResult,
    /// One entry per pipeline position, in [0, 100].
    pub path_progress: Vec<u8>,
}

/// Run `configs` in order; yields the last stage's results.
///
/// The first error ends the stream.
pub fn execute(
    configs: Vec<FetchConfig>,
    priors: Vec<FetchConfigResult>,
    ctx: StageContext,
) -> ResultStream {
    execute_traced(configs, priors, ctx)
        .map(|item| item.map(|y| y.result))
        .boxed()
}

/// [`execute`], also reporting per-position progress for each result.
pub fn execute_traced(
    configs: Vec<FetchConfig>,
    priors: Vec<FetchConfigResult>,
    ctx: StageContext,
) -> BoxStream<'static, Result<PipelineYield, PipelineError>> {
    let mut stack = Vec::with_capacity(configs.len());
    if let Some(head) = configs.first() {
        stack.push(Frame {
            stream: dispatch(head, priors.clone(), &ctx),
            priors,
            progress: 0,
        });
    }

    let walker = Walker {
        configs,
        ctx,
        stack,
        finished: false,
    };

    stream::unfold(walker, |mut walker| async move {
        let item = walker.next().await?;
        Some((item, walker))
    })
    .boxed()
}

/// A running stage at position `stack index`.
struct Frame {
    stream: ResultStream,
    /// Results the stage was started with.
    priors: Vec<FetchConfigResult>,
    /// Progress of the stage's latest result.
    progress: u8,
}

struct Walker {
    configs: Vec<FetchConfig>,
    ctx: StageContext,
    stack: Vec<Frame>,
    finished: bool,
}

impl Walker {
    async fn next(&mut self) -> Option<Result<PipelineYield, PipelineError>> {
        if self.finished {
            return None;
        }

        loop {
            let depth = self.stack.len();
            let frame = self.stack.last_mut()?;
            let next = frame.stream.next().await;

            match next {
                None => {
                    self.stack.pop();
                }
                Some(Err(e)) => {
                    self.finished = true;
                    self.stack.clear();
                    return Some(Err(e));
                }
                Some(Ok(result)) => {
                    frame.progress = result.progress();

                    if depth == self.configs.len() {
                        let path_progress = self.stack.iter().map(|f| f.progress).collect();
                        return Some(Ok(PipelineYield {
                            result,
                            path_progress,
                        }));
                    }

                    let mut priors = frame.priors.clone();
                    priors.push(result);
                    let stream = dispatch(&self.configs[depth], priors.clone(), &self.ctx);
                    self.stack.push(Frame {
                        stream,
                        priors,
                        progress: 0,
                    });
                }
            }
        }
    }
}
