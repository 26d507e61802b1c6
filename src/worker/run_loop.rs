//! Run loops: the body a worker executes when started.

use super::Worker;
use super::wakeup::Wake;
use crate::error::Result;
use async_trait::async_trait;
use tracing::{debug, error, info};

/// What a worker does once `run` is called. Install a custom one through
/// `WorkerConfig` to change cadence or bound iterations.
#[async_trait]
pub trait RunLoop: Send + Sync {
    async fn run(&self, worker: &Worker) -> Result<()>;
}

/// Drain the queue, sleep on the wake-up channel, repeat until shutdown.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultLoop;

#[async_trait]
impl RunLoop for DefaultLoop {
    async fn run(&self, worker: &Worker) -> Result<()> {
        loop {
            debug!(worker_id = %worker.id(), "processing until empty");
            match worker.process_until_empty().await {
                Ok(0) => {}
                Ok(batches) => info!(worker_id = %worker.id(), batches, "queue drained"),
                Err(e) => error!(worker_id = %worker.id(), "process error: {e}"),
            }

            if worker.wait_for_work().await? == Wake::Shutdown {
                info!(worker_id = %worker.id(), "worker shutting down");
                return Ok(());
            }
        }
    }
}
