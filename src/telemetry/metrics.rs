//! Metric instrument factories for workflow-tagger.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"workflow-tagger"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for workflow-tagger instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("workflow-tagger")
}

/// Counter: work items finished.
/// Labels: `status` ("success" | "skipped" | "failed" | "dry-run").
pub fn items_processed() -> Counter<u64> {
    meter()
        .u64_counter("tagger.items.processed")
        .with_description("Number of work items that reached a final status")
        .build()
}

/// Counter: remote API calls.
/// Labels: `operation`, `result` ("ok" or an error kind).
pub fn api_calls() -> Counter<u64> {
    meter()
        .u64_counter("tagger.api.calls")
        .with_description("Number of remote API calls")
        .build()
}

/// Counter: retries scheduled by the edge-case policy.
/// Labels: `kind` (error kind that triggered the retry).
pub fn retries() -> Counter<u64> {
    meter()
        .u64_counter("tagger.retries")
        .with_description("Number of retried tag applications")
        .build()
}

/// Counter: tag list cache lookups.
/// Labels: `result` ("hit" | "miss").
pub fn cache_lookups() -> Counter<u64> {
    meter()
        .u64_counter("tagger.cache.lookups")
        .with_description("Tag list cache lookups")
        .build()
}

/// Histogram: per-item duration in milliseconds, first attempt to final outcome.
pub fn item_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("tagger.item.duration_ms")
        .with_description("Per-item processing duration in milliseconds")
        .with_unit("ms")
        .build()
}
