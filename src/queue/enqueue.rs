//! Enqueue: insert one row per requested entity and wake sleeping workers.

use crate::error::Result;
use crate::model::{NOTIFY_CHANNEL, NewQueueItems};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use sqlx::{Postgres, Transaction};
use tracing::debug;

impl super::Queue {
    /// Insert one row per entity id (duplicates included) and notify
    /// listening workers. Returns the number of rows inserted.
    pub async fn enqueue(&self, new: NewQueueItems) -> Result<u64> {
        if new.entity_ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.begin().await?;
        let inserted = Self::enqueue_in(&mut tx, &new).await?;
        tx.commit().await?;

        debug!(
            op = %new.op,
            entity_type = %new.entity_type,
            inserted,
            "enqueued queue items"
        );
        metrics::items_enqueued().add(
            inserted,
            &[
                KeyValue::new("op", new.op),
                KeyValue::new("entity_type", new.entity_type),
            ],
        );

        Ok(inserted)
    }

    /// Enqueue as part of a caller-owned transaction, e.g. alongside the
    /// write that made the work necessary. Rows and the wake-up signal
    /// only become visible when `tx` commits.
    pub async fn enqueue_in(
        tx: &mut Transaction<'_, Postgres>,
        new: &NewQueueItems,
    ) -> Result<u64> {
        if new.entity_ids.is_empty() {
            return Ok(0);
        }

        let inserted = sqlx::query(
            "INSERT INTO postqueue (op, entity_type, entity_id, next_run_at)
             SELECT $1, $2, entity_id, COALESCE($4::timestamptz, now())
             FROM unnest($3::bigint[]) AS entity_id",
        )
        .bind(&new.op)
        .bind(&new.entity_type)
        .bind(&new.entity_ids)
        .bind(new.run_at)
        .execute(&mut **tx)
        .await?
        .rows_affected();

        // NOTIFY is transactional — only fires on commit
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(NOTIFY_CHANNEL)
            .bind(&new.op)
            .execute(&mut **tx)
            .await?;

        Ok(inserted)
    }
}
