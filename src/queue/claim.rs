//! Claim selection: find eligible items and lock them for the enclosing
//! transaction.

use super::TABLE;
use crate::error::Result;
use crate::model::{Filter, MAX_ATTEMPTS, QueueItem};
use sqlx::{Postgres, QueryBuilder, Transaction};

const ITEM_COLUMNS: &str =
    "id, op, entity_type, entity_id, failed_attempts, next_run_at, created_at";

impl super::Queue {
    /// Lock up to `limit` eligible items matching `filter`, oldest due first.
    ///
    /// Rows locked by other transactions are skipped, never waited on.
    /// Rows already locked by `tx` itself are returned again. `None`
    /// locks every match. Locks are held until `tx` ends.
    pub async fn select_and_lock(
        tx: &mut Transaction<'_, Postgres>,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<QueueItem>> {
        let rows: Vec<QueueItemRow> = claim_query(filter, limit)
            .build_query_as()
            .fetch_all(&mut **tx)
            .await?;
        Ok(rows.into_iter().map(QueueItemRow::into_queue_item).collect())
    }

    /// Read items matching `filter` without locking and regardless of
    /// eligibility, in claim order.
    pub async fn items(&self, filter: &Filter) -> Result<Vec<QueueItem>> {
        let mut query = QueryBuilder::new(format!("SELECT {ITEM_COLUMNS} FROM {TABLE} WHERE TRUE"));
        push_filter(&mut query, filter);
        query.push(" ORDER BY next_run_at, id");

        let rows: Vec<QueueItemRow> = query.build_query_as().fetch_all(self.pool()).await?;
        Ok(rows.into_iter().map(QueueItemRow::into_queue_item).collect())
    }
}

/// Build the locking SELECT. Eligibility is checked against the database
/// clock so enqueuers and workers agree on "now".
pub(crate) fn claim_query(filter: &Filter, limit: Option<usize>) -> QueryBuilder<'static, Postgres> {
    let mut query = QueryBuilder::new(format!(
        "SELECT {ITEM_COLUMNS} FROM {TABLE} WHERE failed_attempts < "
    ));
    query.push_bind(MAX_ATTEMPTS as i32);
    query.push(" AND next_run_at < now()");
    push_filter(&mut query, filter);
    query.push(" ORDER BY next_run_at, id");
    if let Some(limit) = limit {
        query.push(" LIMIT ").push_bind(limit_param(limit));
    }
    query.push(" FOR UPDATE SKIP LOCKED");
    query
}

/// Postgres LIMIT is a signed bigint; larger limits mean "no cap" anyway.
fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn push_filter(query: &mut QueryBuilder<'static, Postgres>, filter: &Filter) {
    if let Some(ref op) = filter.op {
        query.push(" AND op = ").push_bind(op.clone());
    }
    if let Some(ref entity_type) = filter.entity_type {
        query.push(" AND entity_type = ").push_bind(entity_type.clone());
    }
    if let Some(ref ids) = filter.entity_ids {
        query.push(" AND entity_id = ANY(").push_bind(ids.clone()).push(")");
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct QueueItemRow {
    id: i64,
    op: String,
    entity_type: String,
    entity_id: i64,
    failed_attempts: i32,
    next_run_at: chrono::DateTime<chrono::Utc>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl QueueItemRow {
    fn into_queue_item(self) -> QueueItem {
        QueueItem {
            id: self.id,
            op: self.op,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            failed_attempts: self.failed_attempts.max(0) as u32,
            next_run_at: self.next_run_at,
            created_at: self.created_at,
        }
    }
}
