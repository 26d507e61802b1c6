//! Batch span helpers.

use tracing::Span;

/// Start a span for one handler invocation.
///
/// The `batch.status` field is declared empty and filled in by
/// [`record_batch_outcome`].
pub fn start_batch_span(op: &str, entity_type: &str, items: usize) -> Span {
    tracing::info_span!(
        "postqueue.batch",
        "batch.op" = op,
        "batch.entity_type" = entity_type,
        "batch.items" = items,
        "batch.status" = tracing::field::Empty,
    )
}

/// Record how the batch ended and emit an event inside its span.
pub fn record_batch_outcome(span: &Span, status: &str) {
    span.record("batch.status", status);
    span.in_scope(|| {
        tracing::debug!(status, "batch finished");
    });
}
