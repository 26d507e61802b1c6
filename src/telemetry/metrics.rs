//! Metric instrument factories for postqueue.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"postqueue"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for postqueue instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("postqueue")
}

/// Counter: rows inserted by enqueue.
/// Labels: `op`, `entity_type`.
pub fn items_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("postqueue.items.enqueued")
        .with_description("Number of queue items enqueued")
        .build()
}

/// Counter: rows deleted after a successful handler call.
/// Labels: `op`, `entity_type`.
pub fn items_processed() -> Counter<u64> {
    meter()
        .u64_counter("postqueue.items.processed")
        .with_description("Number of queue items processed and removed")
        .build()
}

/// Counter: rows postponed, whether signalled or after a handler error.
/// Labels: `op`, `entity_type`.
pub fn items_postponed() -> Counter<u64> {
    meter()
        .u64_counter("postqueue.items.postponed")
        .with_description("Number of queue items postponed for retry")
        .build()
}

/// Counter: rows that reached the attempt limit and stopped being selected.
pub fn items_exhausted() -> Counter<u64> {
    meter()
        .u64_counter("postqueue.items.exhausted")
        .with_description("Number of queue items that exhausted their attempts")
        .build()
}

/// Counter: handler invocations that returned an error.
/// Labels: `op`, `entity_type`.
pub fn handler_errors() -> Counter<u64> {
    meter()
        .u64_counter("postqueue.handler.errors")
        .with_description("Number of failed handler invocations")
        .build()
}

/// Histogram: wall time of one process call, transaction included.
/// Labels: `op`, `status` ("completed" | "postponed" | "error").
pub fn batch_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("postqueue.batch.duration_ms")
        .with_description("Batch processing duration in milliseconds")
        .with_unit("ms")
        .build()
}
