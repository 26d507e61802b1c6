//! Worker: repeatedly drains the queue through a handler, then sleeps on
//! a wake-up channel.
//!
//! Workers share no in-process state; any number of them, in any number of
//! processes, coordinate only through row locks on the queue table.

pub mod run_loop;
pub mod wakeup;

pub use run_loop::{DefaultLoop, RunLoop};
pub use wakeup::{PgNotifyWakeUp, PollingWakeUp, Wake, WakeUp};

use crate::error::{Error, Result};
use crate::handler::Handler;
use crate::model::{ProcessOptions, Processed};
use crate::queue::Queue;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, Notify};
use tracing::{error, info};
use uuid::Uuid;

/// Configuration for a worker.
#[derive(Clone, Default)]
pub struct WorkerConfig {
    /// Options for every `process` call the worker makes.
    pub options: ProcessOptions,
    /// Loop body; `None` means [`DefaultLoop`].
    pub run_loop: Option<Arc<dyn RunLoop>>,
}

impl WorkerConfig {
    pub fn options(mut self, options: ProcessOptions) -> Self {
        self.options = options;
        self
    }

    pub fn run_loop(mut self, run_loop: impl RunLoop + 'static) -> Self {
        self.run_loop = Some(Arc::new(run_loop));
        self
    }
}

/// Lets the host stop a running worker from another task.
#[derive(Clone, Default)]
pub struct ShutdownHandle {
    inner: Arc<ShutdownState>,
}

#[derive(Default)]
struct ShutdownState {
    requested: AtomicBool,
    notify: Notify,
}

impl ShutdownHandle {
    /// Stop after the current batch, or wake the worker if it is idle.
    pub fn shutdown(&self) {
        self.inner.requested.store(true, Ordering::SeqCst);
        self.inner.notify.notify_one();
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }
}

/// One worker. Processes batches strictly one after another.
pub struct Worker {
    id: Uuid,
    queue: Queue,
    handler: Arc<dyn Handler>,
    wakeup: Mutex<Box<dyn WakeUp>>,
    config: WorkerConfig,
    shutdown: ShutdownHandle,
}

impl Worker {
    pub fn new(
        queue: Queue,
        handler: Arc<dyn Handler>,
        wakeup: impl WakeUp + 'static,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue,
            handler,
            wakeup: Mutex::new(Box::new(wakeup)),
            config,
            shutdown: ShutdownHandle::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Signal the worker to shut down.
    pub fn shutdown(&self) {
        self.shutdown.shutdown();
    }

    /// Run the configured loop, or [`DefaultLoop`] if none was configured.
    pub async fn run(&self) -> Result<()> {
        let run_loop = self
            .config
            .run_loop
            .clone()
            .unwrap_or_else(|| Arc::new(DefaultLoop));
        info!(worker_id = %self.id, "worker started");
        run_loop.run(self).await
    }

    /// Process batches until nothing eligible is left. Returns how many
    /// batches were handled.
    ///
    /// A failing handler only postpones its batch, so draining continues.
    /// Storage errors stop the drain and are returned.
    pub async fn process_until_empty(&self) -> Result<usize> {
        let mut batches = 0;
        while !self.shutdown.is_requested() {
            match self
                .queue
                .process(&self.config.options, self.handler.as_ref())
                .await
            {
                Ok(Processed::Empty) => break,
                Ok(_) => batches += 1,
                Err(Error::Handler(e)) => {
                    batches += 1;
                    error!(worker_id = %self.id, error = %e, "handler failed, batch postponed");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(batches)
    }

    /// Block until the wake-up channel fires or shutdown is requested.
    pub async fn wait_for_work(&self) -> Result<Wake> {
        if self.shutdown.is_requested() {
            return Ok(Wake::Shutdown);
        }
        let mut wakeup = self.wakeup.lock().await;
        tokio::select! {
            _ = self.shutdown.inner.notify.notified() => Ok(Wake::Shutdown),
            wake = wakeup.wait() => wake,
        }
    }
}
