//! Deletion Strategy Library
//!
//! Named execution patterns a resource type picks for its Nuker. Every
//! strategy returns exactly one [`NukeResult`] per input identifier, in input
//! order, whatever happens to the individual deletions. Failures are attached
//! to the identifier that caused them and never stop sibling identifiers.

use super::CallContext;
use crate::error::NukeError;
use crate::wait::{poll_until, WaitConfig};
use futures::future::{join_all, BoxFuture};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Deletes (or runs one step against) a single identifier
pub type DeleteFn<C> =
    Arc<dyn Fn(CallContext<C>, String) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Deletes a whole batch of identifiers in one provider call
pub type BulkDeleteFn<C> = Arc<
    dyn Fn(CallContext<C>, Vec<String>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync,
>;

/// Returns `true` once the identifier no longer exists
pub type AbsentFn<C> =
    Arc<dyn Fn(CallContext<C>, String) -> BoxFuture<'static, anyhow::Result<bool>> + Send + Sync>;

/// Returns `true` once none of the identifiers exist any more
pub type AllAbsentFn<C> = Arc<
    dyn Fn(CallContext<C>, Vec<String>) -> BoxFuture<'static, anyhow::Result<bool>> + Send + Sync,
>;

/// Outcome of submitting one identifier to a Nuker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NukeResult {
    pub identifier: String,
    pub error: Option<NukeError>,
}

impl NukeResult {
    pub fn deleted(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            error: None,
        }
    }

    pub fn failed(identifier: impl Into<String>, error: NukeError) -> Self {
        Self {
            identifier: identifier.into(),
            error: Some(error),
        }
    }

    fn from_result(identifier: String, result: Result<(), NukeError>) -> Self {
        match result {
            Ok(()) => Self::deleted(identifier),
            Err(e) => Self::failed(identifier, e),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Everything a strategy invocation produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NukeOutcome {
    /// One entry per submitted identifier
    pub results: Vec<NukeResult>,
    /// Type-level failure that does not belong to any single identifier
    /// (e.g. the collective wait of [`DeletionStrategy::ConcurrentDeleteThenWaitAll`])
    pub error: Option<NukeError>,
}

/// One named stage of a [`DeletionStrategy::MultiStep`] pipeline
pub struct Step<C> {
    pub name: &'static str,
    pub run: DeleteFn<C>,
}

impl<C> Clone for Step<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            run: self.run.clone(),
        }
    }
}

impl<C: Send + 'static> Step<C> {
    pub fn new<F, Fut>(name: &'static str, f: F) -> Self
    where
        F: Fn(CallContext<C>, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name,
            run: delete_fn(f),
        }
    }
}

/// How a resource type's identifiers get deleted
pub enum DeletionStrategy<C> {
    /// Chunks of `batch_size`, identifiers within a chunk deleted in parallel
    SimpleBatch { delete: DeleteFn<C> },
    /// One identifier at a time, in input order, continuing past failures
    Sequential { delete: DeleteFn<C> },
    /// One provider bulk call per chunk of `batch_size`
    Bulk { delete: BulkDeleteFn<C> },
    /// Parallel deletes, then one collective wait over the deleted set
    ConcurrentDeleteThenWaitAll {
        delete: DeleteFn<C>,
        all_absent: AllAbsentFn<C>,
        wait: WaitConfig,
    },
    /// Per identifier: issue the delete, then poll until it is gone
    DeleteThenWait {
        delete: DeleteFn<C>,
        absent: AbsentFn<C>,
        wait: WaitConfig,
    },
    /// Per identifier ordered pipeline; a failed step stops that identifier
    MultiStep { steps: Vec<Step<C>> },
}

/// Box an async closure into a [`DeleteFn`].
pub fn delete_fn<C, F, Fut>(f: F) -> DeleteFn<C>
where
    C: Send + 'static,
    F: Fn(CallContext<C>, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |ctx, id| Box::pin(f(ctx, id)))
}

impl<C> DeletionStrategy<C>
where
    C: Clone + Send + Sync + 'static,
{
    pub fn simple_batch<F, Fut>(f: F) -> Self
    where
        F: Fn(CallContext<C>, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::SimpleBatch {
            delete: delete_fn(f),
        }
    }

    pub fn sequential<F, Fut>(f: F) -> Self
    where
        F: Fn(CallContext<C>, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::Sequential {
            delete: delete_fn(f),
        }
    }

    pub fn bulk<F, Fut>(f: F) -> Self
    where
        F: Fn(CallContext<C>, Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::Bulk {
            delete: Arc::new(move |ctx, ids| Box::pin(f(ctx, ids))),
        }
    }

    pub fn concurrent_delete_then_wait_all<D, DFut, W, WFut>(
        delete: D,
        all_absent: W,
        wait: WaitConfig,
    ) -> Self
    where
        D: Fn(CallContext<C>, String) -> DFut + Send + Sync + 'static,
        DFut: Future<Output = anyhow::Result<()>> + Send + 'static,
        W: Fn(CallContext<C>, Vec<String>) -> WFut + Send + Sync + 'static,
        WFut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        Self::ConcurrentDeleteThenWaitAll {
            delete: delete_fn(delete),
            all_absent: Arc::new(move |ctx, ids| Box::pin(all_absent(ctx, ids))),
            wait,
        }
    }

    pub fn delete_then_wait<D, DFut, W, WFut>(delete: D, absent: W, wait: WaitConfig) -> Self
    where
        D: Fn(CallContext<C>, String) -> DFut + Send + Sync + 'static,
        DFut: Future<Output = anyhow::Result<()>> + Send + 'static,
        W: Fn(CallContext<C>, String) -> WFut + Send + Sync + 'static,
        WFut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        Self::DeleteThenWait {
            delete: delete_fn(delete),
            absent: Arc::new(move |ctx, id| Box::pin(absent(ctx, id))),
            wait,
        }
    }

    pub fn multi_step(steps: Vec<Step<C>>) -> Self {
        Self::MultiStep { steps }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SimpleBatch { .. } => "simple-batch",
            Self::Sequential { .. } => "sequential",
            Self::Bulk { .. } => "bulk",
            Self::ConcurrentDeleteThenWaitAll { .. } => "concurrent-delete-then-wait-all",
            Self::DeleteThenWait { .. } => "delete-then-wait",
            Self::MultiStep { .. } => "multi-step",
        }
    }

    /// Run the strategy over `identifiers`.
    pub async fn execute(
        &self,
        ctx: &CallContext<C>,
        batch_size: usize,
        identifiers: &[String],
    ) -> NukeOutcome {
        let batch_size = batch_size.max(1);
        debug!(
            type_name = %ctx.type_name,
            region = %ctx.scope,
            strategy = self.name(),
            count = identifiers.len(),
            batch_size,
            "Executing deletion strategy"
        );

        match self {
            Self::SimpleBatch { delete } => NukeOutcome {
                results: simple_batch(ctx, batch_size, identifiers, delete).await,
                error: None,
            },
            Self::Sequential { delete } => NukeOutcome {
                results: sequential(ctx, identifiers, delete).await,
                error: None,
            },
            Self::Bulk { delete } => NukeOutcome {
                results: bulk(ctx, batch_size, identifiers, delete).await,
                error: None,
            },
            Self::ConcurrentDeleteThenWaitAll {
                delete,
                all_absent,
                wait,
            } => concurrent_delete_then_wait_all(ctx, batch_size, identifiers, delete, all_absent, *wait)
                .await,
            Self::DeleteThenWait {
                delete,
                absent,
                wait,
            } => NukeOutcome {
                results: delete_then_wait(ctx, batch_size, identifiers, delete, absent, *wait).await,
                error: None,
            },
            Self::MultiStep { steps } => NukeOutcome {
                results: multi_step(ctx, batch_size, identifiers, steps).await,
                error: None,
            },
        }
    }
}

/// Run `per_id` over each chunk concurrently. Chunks issued after cancellation
/// are reported as cancelled without being attempted.
async fn for_each_chunk<C, F, Fut>(
    ctx: &CallContext<C>,
    batch_size: usize,
    identifiers: &[String],
    per_id: F,
) -> Vec<NukeResult>
where
    C: Clone,
    F: Fn(CallContext<C>, String) -> Fut,
    Fut: Future<Output = Result<(), NukeError>>,
{
    let mut results = Vec::with_capacity(identifiers.len());

    for chunk in identifiers.chunks(batch_size) {
        if ctx.cancel.is_cancelled() {
            results.extend(cancelled(chunk));
            continue;
        }

        let futures = chunk.iter().map(|id| {
            let fut = per_id(ctx.clone(), id.clone());
            let id = id.clone();
            async move { NukeResult::from_result(id, fut.await) }
        });
        results.extend(join_all(futures).await);
    }

    results
}

fn cancelled(ids: &[String]) -> impl Iterator<Item = NukeResult> + '_ {
    ids.iter()
        .map(|id| NukeResult::failed(id.clone(), NukeError::Cancelled))
}

async fn run_delete<C>(delete: &DeleteFn<C>, ctx: CallContext<C>, id: String) -> Result<(), NukeError> {
    delete(ctx, id).await.map_err(|e| NukeError::from_anyhow(&e))
}

async fn simple_batch<C: Clone>(
    ctx: &CallContext<C>,
    batch_size: usize,
    identifiers: &[String],
    delete: &DeleteFn<C>,
) -> Vec<NukeResult> {
    for_each_chunk(ctx, batch_size, identifiers, |ctx, id| run_delete(delete, ctx, id)).await
}

async fn sequential<C: Clone>(
    ctx: &CallContext<C>,
    identifiers: &[String],
    delete: &DeleteFn<C>,
) -> Vec<NukeResult> {
    let mut results = Vec::with_capacity(identifiers.len());

    for id in identifiers {
        if ctx.cancel.is_cancelled() {
            results.push(NukeResult::failed(id.clone(), NukeError::Cancelled));
            continue;
        }
        let result = run_delete(delete, ctx.clone(), id.clone()).await;
        if let Err(e) = &result {
            warn!(type_name = %ctx.type_name, identifier = %id, error = %e, "Delete failed, continuing");
        }
        results.push(NukeResult::from_result(id.clone(), result));
    }

    results
}

async fn bulk<C: Clone>(
    ctx: &CallContext<C>,
    batch_size: usize,
    identifiers: &[String],
    delete: &BulkDeleteFn<C>,
) -> Vec<NukeResult> {
    let mut results = Vec::with_capacity(identifiers.len());

    for chunk in identifiers.chunks(batch_size) {
        if ctx.cancel.is_cancelled() {
            results.extend(cancelled(chunk));
            continue;
        }

        match delete(ctx.clone(), chunk.to_vec()).await {
            Ok(()) => results.extend(chunk.iter().map(|id| NukeResult::deleted(id.clone()))),
            Err(e) => {
                let error = NukeError::from_anyhow(&e);
                warn!(type_name = %ctx.type_name, count = chunk.len(), error = %error, "Bulk delete failed");
                results.extend(
                    chunk
                        .iter()
                        .map(|id| NukeResult::failed(id.clone(), error.clone())),
                );
            }
        }
    }

    results
}

async fn concurrent_delete_then_wait_all<C: Clone>(
    ctx: &CallContext<C>,
    batch_size: usize,
    identifiers: &[String],
    delete: &DeleteFn<C>,
    all_absent: &AllAbsentFn<C>,
    wait: WaitConfig,
) -> NukeOutcome {
    let results = simple_batch(ctx, batch_size, identifiers, delete).await;

    let issued: Vec<String> = results
        .iter()
        .filter(|r| r.is_ok())
        .map(|r| r.identifier.clone())
        .collect();

    if issued.is_empty() {
        return NukeOutcome {
            results,
            error: None,
        };
    }

    let error = poll_until(wait, &ctx.cancel, &ctx.type_name, || {
        all_absent(ctx.clone(), issued.clone())
    })
    .await
    .err();

    if let Some(e) = &error {
        warn!(
            type_name = %ctx.type_name,
            region = %ctx.scope,
            count = issued.len(),
            error = %e,
            "Deletes issued but resources still present"
        );
    }

    NukeOutcome { results, error }
}

async fn delete_then_wait<C: Clone>(
    ctx: &CallContext<C>,
    batch_size: usize,
    identifiers: &[String],
    delete: &DeleteFn<C>,
    absent: &AbsentFn<C>,
    wait: WaitConfig,
) -> Vec<NukeResult> {
    for_each_chunk(ctx, batch_size, identifiers, |ctx, id| async move {
        run_delete(delete, ctx.clone(), id.clone()).await?;
        let what = format!("{} {}", ctx.type_name, id);
        poll_until(wait, &ctx.cancel, &what, || absent(ctx.clone(), id.clone())).await
    })
    .await
}

async fn multi_step<C: Clone>(
    ctx: &CallContext<C>,
    batch_size: usize,
    identifiers: &[String],
    steps: &[Step<C>],
) -> Vec<NukeResult> {
    for_each_chunk(ctx, batch_size, identifiers, |ctx, id| async move {
        for step in steps {
            if ctx.cancel.is_cancelled() {
                return Err(NukeError::Cancelled);
            }
            debug!(type_name = %ctx.type_name, identifier = %id, step = step.name, "Running step");
            if let Err(e) = run_delete(&step.run, ctx.clone(), id.clone()).await {
                return Err(NukeError::Step {
                    step: step.name.to_string(),
                    source: Box::new(e),
                });
            }
        }
        Ok(())
    })
    .await
}
