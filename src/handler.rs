//! Handlers: the application code that actually does the queued work.

use crate::model::{Batch, Outcome};
use async_trait::async_trait;
use std::future::Future;
use tracing::info;

/// Processes one batch of same-key items.
///
/// Returning `Err` is treated like `Outcome::Postpone` for the items, and
/// the error is then surfaced to whoever called `process`. Handlers run
/// while the rows are locked, so keep them short.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, batch: &Batch) -> anyhow::Result<Outcome>;
}

/// Accepts every batch without doing anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

#[async_trait]
impl Handler for NoopHandler {
    async fn handle(&self, batch: &Batch) -> anyhow::Result<Outcome> {
        info!(
            op = %batch.op,
            entity_type = %batch.entity_type,
            count = batch.entity_ids.len(),
            "no handler configured, dropping batch"
        );
        Ok(Outcome::done())
    }
}

/// Adapter produced by [`handler_fn`].
pub struct FnHandler<F>(F);

/// Wrap an async closure as a [`Handler`].
///
/// ```no_run
/// use postqueue::handler::handler_fn;
/// use postqueue::model::Outcome;
///
/// let handler = handler_fn(|batch| async move {
///     println!("{} {:?}", batch.op, batch.entity_ids);
///     Ok::<_, anyhow::Error>(Outcome::done())
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Batch) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Outcome>> + Send,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Batch) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Outcome>> + Send,
{
    async fn handle(&self, batch: &Batch) -> anyhow::Result<Outcome> {
        (self.0)(batch.clone()).await
    }
}
