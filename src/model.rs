//! Core data model.
//!
//! A queue item is a request to run `op` against one entity, identified by
//! `(entity_type, entity_id)`. Items are grouped into batches by
//! `(op, entity_type)` and retried on a fixed delay until they succeed or
//! exhaust their attempts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Items with this many failed attempts are never selected again.
pub const MAX_ATTEMPTS: u32 = 3;

/// How far `next_run_at` moves forward on every postponement.
pub const POSTPONE_DELAY: Duration = Duration::from_secs(10);

/// Default upper bound on items selected into one batch.
pub const DEFAULT_BATCH_LIMIT: usize = 100;

/// Postgres NOTIFY channel signalled whenever work is enqueued.
pub const NOTIFY_CHANNEL: &str = "postqueue_ready";

// ---------------------------------------------------------------------------
// Queue Item
// ---------------------------------------------------------------------------

/// A row in the queue table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Monotonic identifier, used as a tie-break when ordering.
    pub id: i64,

    /// Symbolic operation name (e.g., "resize", "reindex").
    pub op: String,

    /// Symbolic subject type (e.g., "Image").
    pub entity_type: String,

    /// The subject the operation applies to.
    pub entity_id: i64,

    /// Incremented on every postponement.
    pub failed_attempts: u32,

    /// The item can only be claimed once this lies in the past.
    pub next_run_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,
}

impl QueueItem {
    /// Would a claim issued at `now` consider this item?
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        !self.is_exhausted() && self.next_run_at < now
    }

    /// Has this item used up all of its attempts?
    pub fn is_exhausted(&self) -> bool {
        self.failed_attempts >= MAX_ATTEMPTS
    }
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Caller-supplied restriction on which items a claim may select.
///
/// All set fields are ANDed together. The eligibility rule is always
/// applied on top of the filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub op: Option<String>,
    pub entity_type: Option<String>,
    pub entity_ids: Option<Vec<i64>>,
}

impl Filter {
    /// A filter matching every item.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    pub fn entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    pub fn entity_ids(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.entity_ids = Some(ids.into_iter().collect());
        self
    }

    /// Narrow to a single `(op, entity_type)` batch key.
    pub fn batch_key(self, op: &str, entity_type: &str) -> Self {
        self.op(op).entity_type(entity_type)
    }
}

// ---------------------------------------------------------------------------
// Batch + Outcome
// ---------------------------------------------------------------------------

/// The unit of work handed to a handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub op: String,
    pub entity_type: String,
    pub entity_ids: Vec<i64>,
}

/// What a handler decided about a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Processed; the items are deleted and the value is returned to the caller.
    Success(serde_json::Value),
    /// Not processed this time; the items are retried after [`POSTPONE_DELAY`].
    Postpone,
}

impl Outcome {
    /// Success without a meaningful result value.
    pub fn done() -> Self {
        Outcome::Success(serde_json::Value::Null)
    }
}

/// Result of a single `process` call.
#[derive(Debug, Clone, PartialEq)]
pub enum Processed {
    /// Nothing eligible matched the filter. No handler call, no writes.
    Empty,
    /// The handler succeeded and `items` rows were deleted.
    Completed {
        batch: Batch,
        items: usize,
        result: serde_json::Value,
    },
    /// The handler asked for a retry and `items` rows were postponed.
    Postponed { batch: Batch, items: usize },
}

impl Processed {
    pub fn is_empty(&self) -> bool {
        matches!(self, Processed::Empty)
    }

    /// The batch that was handled, if any.
    pub fn batch(&self) -> Option<&Batch> {
        match self {
            Processed::Empty => None,
            Processed::Completed { batch, .. } | Processed::Postponed { batch, .. } => Some(batch),
        }
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Knobs for one call to `Queue::process`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOptions {
    pub filter: Filter,
    /// Maximum items selected into the batch (before duplicate expansion).
    pub limit: usize,
    /// Sweep up every eligible duplicate of the batch's entity ids.
    pub skip_duplicates: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            filter: Filter::all(),
            limit: DEFAULT_BATCH_LIMIT,
            skip_duplicates: true,
        }
    }
}

impl ProcessOptions {
    /// Exactly one item, no batch expansion and no duplicate sweep.
    pub fn one() -> Self {
        Self {
            filter: Filter::all(),
            limit: 1,
            skip_duplicates: false,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn skip_duplicates(mut self, skip: bool) -> Self {
        self.skip_duplicates = skip;
        self
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for enqueuing work. One row is inserted per entity id,
/// duplicates included.
#[derive(Debug, Clone)]
pub struct NewQueueItems {
    pub(crate) op: String,
    pub(crate) entity_type: String,
    pub(crate) entity_ids: Vec<i64>,
    pub(crate) run_at: Option<DateTime<Utc>>,
}

impl NewQueueItems {
    pub fn new(op: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            entity_type: entity_type.into(),
            entity_ids: Vec::new(),
            run_at: None,
        }
    }

    pub fn entity_id(mut self, id: i64) -> Self {
        self.entity_ids.push(id);
        self
    }

    pub fn entity_ids(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.entity_ids.extend(ids);
        self
    }

    /// Schedule the items for a specific time instead of "now".
    pub fn run_at(mut self, at: DateTime<Utc>) -> Self {
        self.run_at = Some(at);
        self
    }
}
