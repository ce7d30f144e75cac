//! Batch and item span helpers.

use tracing::Span;
use uuid::Uuid;

/// Start a span covering one whole orchestrator run.
pub fn start_run_span(run_id: &Uuid, tag_name: &str, dry_run: bool) -> Span {
    tracing::info_span!(
        "tagger.run",
        "run.id" = %run_id,
        "run.tag" = tag_name,
        "run.dry_run" = dry_run,
        "run.phase" = tracing::field::Empty,
    )
}

/// Start a span for one work item.
///
/// `item.status` is declared empty and filled by [`record_item_status`].
pub fn start_item_span(item_id: &str, worker: usize) -> Span {
    tracing::info_span!(
        "tagger.item",
        "item.id" = item_id,
        "item.worker" = worker,
        "item.status" = tracing::field::Empty,
        "item.retries" = tracing::field::Empty,
    )
}

pub fn record_item_status(span: &Span, status: &str, retries: u32) {
    span.record("item.status", status);
    span.record("item.retries", retries);
}

/// Record an orchestrator phase change on the run span.
pub fn record_phase(span: &Span, phase: &str) {
    span.record("run.phase", phase);
    span.in_scope(|| {
        tracing::debug!(phase, "phase_entered");
    });
}
