//! Wake-up channel: how an idle worker sleeps until there is new work.

use crate::error::Result;
use crate::model::NOTIFY_CHANNEL;
use crate::queue::Queue;
use async_trait::async_trait;
use sqlx::postgres::PgListener;
use std::time::Duration;
use tracing::{debug, warn};

/// Why a worker woke up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// An enqueue signalled new work.
    Notified,
    /// The wait timed out; there may be postponed work that became due.
    TimedOut,
    /// The host asked the worker to stop.
    Shutdown,
}

/// A blocking wait for new work.
#[async_trait]
pub trait WakeUp: Send {
    async fn wait(&mut self) -> Result<Wake>;
}

/// Sleeps for a fixed interval. Useful without LISTEN/NOTIFY and in tests.
#[derive(Debug, Clone)]
pub struct PollingWakeUp {
    interval: Duration,
}

impl PollingWakeUp {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl WakeUp for PollingWakeUp {
    async fn wait(&mut self) -> Result<Wake> {
        tokio::time::sleep(self.interval).await;
        Ok(Wake::TimedOut)
    }
}

/// Waits for a Postgres NOTIFY from `enqueue`, bounded by a poll interval
/// so postponed items that become due are still picked up.
pub struct PgNotifyWakeUp {
    listener: PgListener,
    poll_interval: Duration,
}

impl PgNotifyWakeUp {
    /// Open a dedicated listener connection on the queue's channel.
    pub async fn connect(queue: &Queue, poll_interval: Duration) -> Result<Self> {
        let mut listener = PgListener::connect_with(queue.pool()).await?;
        listener.listen(NOTIFY_CHANNEL).await?;
        Ok(Self {
            listener,
            poll_interval,
        })
    }
}

#[async_trait]
impl WakeUp for PgNotifyWakeUp {
    async fn wait(&mut self) -> Result<Wake> {
        tokio::select! {
            notif = self.listener.recv() => {
                match notif {
                    Ok(n) => {
                        debug!(op = n.payload(), "notified of new work");
                        Ok(Wake::Notified)
                    }
                    Err(e) => {
                        // recv reconnects on the next call; sleep so a dead
                        // server does not turn this into a hot loop
                        warn!("PgListener error: {e}, falling back to poll");
                        tokio::time::sleep(self.poll_interval).await;
                        Ok(Wake::TimedOut)
                    }
                }
            }
            _ = tokio::time::sleep(self.poll_interval) => Ok(Wake::TimedOut),
        }
    }
}
