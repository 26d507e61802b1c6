//! # postqueue
//!
//! A Postgres-backed work queue. Queue items are rows; workers claim
//! disjoint batches with `FOR UPDATE SKIP LOCKED`, group them by
//! `(op, entity_type)`, sweep up duplicate requests, and either delete
//! the rows (success) or postpone them with a fixed retry delay.

pub mod config;
pub mod error;
pub mod handler;
pub mod model;
pub mod queue;
pub mod telemetry;
pub mod worker;

pub use error::{Error, Result};
pub use handler::{Handler, NoopHandler, handler_fn};
pub use model::{Batch, Filter, NewQueueItems, Outcome, ProcessOptions, Processed, QueueItem};
pub use queue::Queue;
pub use worker::{Worker, WorkerConfig};
