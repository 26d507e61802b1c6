//! Batch processing: claim a batch, hand it to a handler, then delete or
//! postpone the claimed rows, all inside one transaction.

use crate::error::{Error, Result};
use crate::handler::Handler;
use crate::model::{Batch, Filter, MAX_ATTEMPTS, Outcome, POSTPONE_DELAY, ProcessOptions, Processed};
use crate::telemetry::batch::{record_batch_outcome, start_batch_span};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use sqlx::{Postgres, Transaction};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{Instrument, warn};

use super::Queue;

/// What one transaction did, reported only once it has committed.
struct Step {
    processed: Processed,
    /// Handler error, raised to the caller after commit.
    failure: Option<anyhow::Error>,
    /// Rows whose postponement used up their last attempt.
    exhausted: Vec<i64>,
}

impl Queue {
    /// Process one batch.
    ///
    /// Returns `Processed::Empty` when nothing eligible matches. When the
    /// handler fails, the batch is postponed, the postponement is
    /// committed, and only then is the failure returned as
    /// `Error::Handler`. Storage errors roll the whole step back.
    pub async fn process(&self, options: &ProcessOptions, handler: &dyn Handler) -> Result<Processed> {
        let started = Instant::now();
        let mut tx = self.begin().await?;

        let step = process_in_transaction(&mut tx, options, handler).await?;

        tx.commit().await?;

        record_step(&step, started);

        match step.failure {
            Some(err) => Err(Error::Handler(err)),
            None => Ok(step.processed),
        }
    }

    /// Process exactly one item: no batch expansion, no duplicate sweep.
    pub async fn process_one(&self, filter: Filter, handler: &dyn Handler) -> Result<Processed> {
        self.process(&ProcessOptions::one().filter(filter), handler).await
    }
}

/// Status label for a committed step; `None` for an empty one.
fn step_status(processed: &Processed, failed: bool) -> Option<&'static str> {
    match processed {
        Processed::Empty => None,
        _ if failed => Some("error"),
        Processed::Completed { .. } => Some("completed"),
        Processed::Postponed { .. } => Some("postponed"),
    }
}

/// Metrics and exhaustion warnings for a committed step.
fn record_step(step: &Step, started: Instant) {
    let Some(batch) = step.processed.batch() else {
        return;
    };
    let Some(status) = step_status(&step.processed, step.failure.is_some()) else {
        return;
    };

    let labels = [
        KeyValue::new("op", batch.op.clone()),
        KeyValue::new("entity_type", batch.entity_type.clone()),
    ];
    match step.processed {
        Processed::Completed { items, .. } => {
            metrics::items_processed().add(items as u64, &labels)
        }
        Processed::Postponed { items, .. } => {
            metrics::items_postponed().add(items as u64, &labels)
        }
        Processed::Empty => {}
    }
    if step.failure.is_some() {
        metrics::handler_errors().add(1, &labels);
    }

    if !step.exhausted.is_empty() {
        warn!(
            ids = ?step.exhausted,
            max_attempts = MAX_ATTEMPTS,
            "queue items exhausted their attempts and will not be retried"
        );
        metrics::items_exhausted().add(step.exhausted.len() as u64, &[]);
    }

    metrics::batch_duration_ms().record(
        started.elapsed().as_secs_f64() * 1000.0,
        &[
            KeyValue::new("op", batch.op.clone()),
            KeyValue::new("status", status),
        ],
    );
}

/// The body of `process`. A returned `Err` means the transaction must be
/// rolled back; a handler error is carried in the `Step` so the caller can
/// commit first.
async fn process_in_transaction(
    tx: &mut Transaction<'_, Postgres>,
    options: &ProcessOptions,
    handler: &dyn Handler,
) -> Result<Step> {
    let Some(first) = Queue::select_and_lock(tx, &options.filter, Some(1))
        .await?
        .into_iter()
        .next()
    else {
        return Ok(Step {
            processed: Processed::Empty,
            failure: None,
            exhausted: Vec::new(),
        });
    };

    // Batches never mix operations or entity types.
    let key_filter = options
        .filter
        .clone()
        .batch_key(&first.op, &first.entity_type);

    let matches = if options.limit > 1 {
        Queue::select_and_lock(tx, &key_filter, Some(options.limit)).await?
    } else {
        vec![first.clone()]
    };

    let mut entity_ids: Vec<i64> = matches.iter().map(|item| item.entity_id).collect();

    let working_set = if options.skip_duplicates {
        entity_ids = dedup_preserving_order(entity_ids);
        let dup_filter = key_filter.entity_ids(entity_ids.iter().copied());
        Queue::select_and_lock(tx, &dup_filter, None).await?
    } else {
        matches
    };

    let ids: Vec<i64> = working_set.iter().map(|item| item.id).collect();
    let batch = Batch {
        op: first.op,
        entity_type: first.entity_type,
        entity_ids,
    };

    let span = start_batch_span(&batch.op, &batch.entity_type, ids.len());

    match handler.handle(&batch).instrument(span.clone()).await {
        Ok(Outcome::Success(result)) => {
            delete_items(tx, &ids).await?;
            record_batch_outcome(&span, "completed");
            Ok(Step {
                processed: Processed::Completed {
                    batch,
                    items: ids.len(),
                    result,
                },
                failure: None,
                exhausted: Vec::new(),
            })
        }
        Ok(Outcome::Postpone) => {
            let exhausted = postpone_items(tx, &ids).await?;
            record_batch_outcome(&span, "postponed");
            Ok(Step {
                processed: Processed::Postponed {
                    batch,
                    items: ids.len(),
                },
                failure: None,
                exhausted,
            })
        }
        Err(err) => {
            let exhausted = postpone_items(tx, &ids).await?;
            record_batch_outcome(&span, "error");
            Ok(Step {
                processed: Processed::Postponed {
                    batch,
                    items: ids.len(),
                },
                failure: Some(err),
                exhausted,
            })
        }
    }
}

async fn delete_items(tx: &mut Transaction<'_, Postgres>, ids: &[i64]) -> Result<()> {
    sqlx::query("DELETE FROM postqueue WHERE id = ANY($1)")
        .bind(ids)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Bump the attempt counter and push `next_run_at` back by the fixed
/// delay, in one statement. Returns the ids that just hit `MAX_ATTEMPTS`.
///
/// The delay is added to the row's own `next_run_at`, not to now, so an
/// item that was already overdue by more than `MAX_ATTEMPTS` delays stays
/// due and can burn through all of its attempts in a single drain.
async fn postpone_items(tx: &mut Transaction<'_, Postgres>, ids: &[i64]) -> Result<Vec<i64>> {
    let rows: Vec<(i64, i32)> = sqlx::query_as(
        "UPDATE postqueue
         SET failed_attempts = failed_attempts + 1,
             next_run_at = next_run_at + make_interval(secs => $1)
         WHERE id = ANY($2)
         RETURNING id, failed_attempts",
    )
    .bind(POSTPONE_DELAY.as_secs_f64())
    .bind(ids)
    .fetch_all(&mut **tx)
    .await?;

    Ok(rows
        .into_iter()
        .filter(|(_, attempts)| *attempts >= MAX_ATTEMPTS as i32)
        .map(|(id, _)| id)
        .collect())
}

fn dedup_preserving_order(ids: Vec<i64>) -> Vec<i64> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> Batch {
        Batch {
            op: "resize".to_string(),
            entity_type: "Image".to_string(),
            entity_ids: vec![1],
        }
    }

    #[test]
    fn dedup_keeps_first_occurrence_order() {
        assert_eq!(dedup_preserving_order(vec![1, 2, 2, 3]), vec![1, 2, 3]);
        assert_eq!(dedup_preserving_order(vec![3, 1, 3, 1, 2]), vec![3, 1, 2]);
        assert!(dedup_preserving_order(Vec::new()).is_empty());
    }

    #[test]
    fn step_status_labels_committed_outcomes() {
        let completed = Processed::Completed {
            batch: batch(),
            items: 1,
            result: serde_json::Value::Null,
        };
        let postponed = Processed::Postponed {
            batch: batch(),
            items: 1,
        };

        assert_eq!(step_status(&Processed::Empty, false), None);
        assert_eq!(step_status(&completed, false), Some("completed"));
        assert_eq!(step_status(&postponed, false), Some("postponed"));
        assert_eq!(step_status(&postponed, true), Some("error"));
    }

    #[test]
    fn recording_an_empty_step_is_a_noop() {
        let step = Step {
            processed: Processed::Empty,
            failure: None,
            exhausted: Vec::new(),
        };
        record_step(&step, Instant::now());
    }
}
