//! Batch processor: drives per-item tag application through a bounded pool
//! of concurrent workers.
//!
//! Workers claim items from a shared cursor, so no item is processed twice
//! and at most `max_concurrent` apply calls are in flight. Every failed
//! attempt goes through [`policy::decide`]. The returned results hold
//! exactly one entry per input item, in input order, whatever happened.

use crate::clock::Clock;
use crate::error::{ApiError, Error};
use crate::model::{
    BatchOutcome, BatchSummary, PerformanceMetrics, ProcessingResult, Status, TagId, WorkItem,
};
use crate::policy::{self, AttemptContext, Decision};
use crate::tags::TagService;
use crate::telemetry::batch::{record_item_status, start_item_span};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

pub const DEFAULT_MAX_CONCURRENT: usize = 5;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Knobs for one batch.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub dry_run: bool,
    /// Worker pool size; also the cap on concurrent apply calls.
    pub max_concurrent: usize,
    pub max_retries: u32,
    /// Backoff base: retry `n` waits `base_delay * 2^n`.
    pub base_delay: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

pub struct BatchProcessor {
    tags: Arc<TagService>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

/// State shared by all workers of one batch.
struct Shared {
    items: Arc<[WorkItem]>,
    next: AtomicUsize,
    tag_id: TagId,
    options: BatchOptions,
    tags: Arc<TagService>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl BatchProcessor {
    pub fn new(tags: Arc<TagService>, clock: Arc<dyn Clock>) -> Self {
        Self {
            tags,
            clock,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned token, e.g. one tripped on Ctrl-C.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Tag every item with `tag_id`.
    ///
    /// Never fails as a whole: per-item failures land in the results. On
    /// cancellation, workers stop claiming items, in-flight calls finish, and
    /// unclaimed items are reported as failed.
    pub async fn process_batch(
        &self,
        items: &[WorkItem],
        tag_id: &TagId,
        options: &BatchOptions,
    ) -> BatchOutcome {
        let started_ms = self.clock.now_ms();
        let worker_count = options.max_concurrent.max(1).min(items.len().max(1));

        info!(
            items = items.len(),
            workers = worker_count,
            dry_run = options.dry_run,
            tag_id = %tag_id,
            "batch started"
        );

        let shared = Arc::new(Shared {
            items: Arc::from(items.to_vec()),
            next: AtomicUsize::new(0),
            tag_id: tag_id.clone(),
            options: options.clone(),
            tags: Arc::clone(&self.tags),
            clock: Arc::clone(&self.clock),
            cancel: self.cancel.clone(),
        });

        let mut join_set = JoinSet::new();
        for worker in 0..worker_count {
            let shared = Arc::clone(&shared);
            join_set.spawn(async move { run_worker(worker, &shared).await });
        }

        let mut slots: Vec<Option<ProcessingResult>> = vec![None; items.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(finished) => {
                    for (index, result) in finished {
                        slots[index] = Some(result);
                    }
                }
                Err(e) => error!("batch worker aborted: {e}"),
            }
        }

        let cancelled = self.cancel.is_cancelled();
        let results: Vec<ProcessingResult> = slots
            .into_iter()
            .zip(items)
            .map(|(slot, item)| {
                slot.unwrap_or_else(|| {
                    let message = if cancelled {
                        "cancelled before processing"
                    } else {
                        "worker aborted before reporting a result"
                    };
                    unprocessed_result(item, message)
                })
            })
            .collect();

        let wall_clock_ms = self.clock.now_ms().saturating_sub(started_ms);
        let summary = BatchSummary::from_results(&results);
        let performance = PerformanceMetrics::compute(&results, wall_clock_ms);

        info!(
            total = summary.total,
            success = summary.success_count,
            failed = summary.failed_count,
            skipped = summary.skipped_count,
            dry_run = summary.dry_run_count,
            retries = performance.total_retries,
            wall_clock_ms,
            speedup = performance.speedup_factor,
            cancelled,
            "batch finished"
        );

        BatchOutcome {
            results,
            summary,
            performance,
            cancelled,
        }
    }
}

async fn run_worker(worker: usize, shared: &Shared) -> Vec<(usize, ProcessingResult)> {
    let mut done = Vec::new();
    loop {
        if shared.cancel.is_cancelled() {
            debug!(worker, "worker stopping on cancellation");
            break;
        }
        let index = shared.next.fetch_add(1, Ordering::SeqCst);
        let Some(item) = shared.items.get(index) else {
            break;
        };
        let span = start_item_span(item.id.as_str(), worker);
        let result = process_work_item(shared, item)
            .instrument(span.clone())
            .await;
        record_item_status(&span, &result.status.to_string(), result.retry_count);
        done.push((index, result));
    }
    done
}

/// One item, first attempt to final outcome.
async fn process_work_item(shared: &Shared, item: &WorkItem) -> ProcessingResult {
    let started_ms = shared.clock.now_ms();
    let display_name = policy::sanitize_display_name(&item.name);
    let finish = |status: Status, message: String, error_detail: Option<String>, retries: u32| {
        let duration_ms = shared.clock.now_ms().saturating_sub(started_ms);
        metrics::items_processed().add(1, &[KeyValue::new("status", status.to_string())]);
        metrics::item_duration_ms().record(duration_ms as f64, &[]);
        ProcessingResult {
            work_item_id: item.id.clone(),
            work_item_name: display_name.clone(),
            work_item_code: item.code.clone(),
            status,
            message,
            error_detail,
            duration_ms,
            retry_count: retries,
            layer: item.layer.clone(),
        }
    };

    if shared.options.dry_run {
        debug!(item = %display_name, "dry run, no api call");
        return finish(
            Status::DryRun,
            format!("would apply tag {}", shared.tag_id),
            None,
            0,
        );
    }

    let mut retries: u32 = 0;
    let mut timeout_ms = shared.tags.request_timeout().as_millis() as u64;

    loop {
        let attempt = shared
            .tags
            .apply_tag_within(&item.id, &shared.tag_id, Duration::from_millis(timeout_ms))
            .await;

        let api_err = match attempt {
            Ok(()) => {
                info!(item = %display_name, retries, outcome = "success", "tag applied");
                return finish(Status::Success, "tag applied".to_string(), None, retries);
            }
            Err(Error::Api(e)) => e,
            Err(other) => {
                error!(item = %display_name, error = %other, "tag application failed");
                return finish(
                    Status::Failed,
                    "tag application failed".to_string(),
                    Some(other.to_string()),
                    retries,
                );
            }
        };

        let ctx = AttemptContext {
            retries_so_far: retries,
            max_retries: shared.options.max_retries,
            base_delay: shared.options.base_delay,
            current_timeout_ms: timeout_ms,
        };

        match policy::decide(&api_err, &ctx) {
            Decision::AlreadyApplied => {
                info!(item = %display_name, outcome = "success", "tag already applied");
                return finish(
                    Status::Success,
                    "tag already applied".to_string(),
                    None,
                    retries,
                );
            }
            Decision::Skip { reason } => {
                warn!(item = %display_name, %reason, "item skipped");
                return finish(Status::Skipped, reason, Some(api_err.to_string()), retries);
            }
            Decision::FailFast { reason } => {
                error!(item = %display_name, %reason, "item failed, not retryable");
                // An auth failure reports the attempts made, not the retries.
                let count = match api_err {
                    ApiError::Unauthorized(_) => retries + 1,
                    _ => retries,
                };
                return finish(Status::Failed, reason, Some(api_err.to_string()), count);
            }
            Decision::Exhausted { reason } => {
                error!(item = %display_name, %reason, "item failed, retries exhausted");
                return finish(
                    Status::Failed,
                    format!("retries exhausted: {reason}"),
                    Some(api_err.to_string()),
                    retries,
                );
            }
            Decision::Retry {
                delay,
                timeout_ms: next_timeout_ms,
                cap_reached,
            } => {
                if cap_reached {
                    warn!(
                        item = %display_name,
                        timeout_ms = next_timeout_ms,
                        "request timeout reached its cap"
                    );
                }
                warn!(
                    item = %display_name,
                    error = %api_err,
                    retry = retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    "retrying tag application"
                );
                metrics::retries().add(1, &[KeyValue::new("kind", api_err.kind())]);

                tokio::select! {
                    biased;
                    _ = shared.cancel.cancelled() => {
                        warn!(item = %display_name, "cancelled during retry backoff");
                        return finish(
                            Status::Failed,
                            "cancelled during retry backoff".to_string(),
                            Some(api_err.to_string()),
                            retries,
                        );
                    }
                    _ = shared.clock.sleep(delay) => {}
                }

                retries += 1;
                timeout_ms = next_timeout_ms;
            }
        }
    }
}

fn unprocessed_result(item: &WorkItem, message: &str) -> ProcessingResult {
    metrics::items_processed().add(1, &[KeyValue::new("status", "failed")]);
    ProcessingResult {
        work_item_id: item.id.clone(),
        work_item_name: policy::sanitize_display_name(&item.name),
        work_item_code: item.code.clone(),
        status: Status::Failed,
        message: message.to_string(),
        error_detail: None,
        duration_ms: 0,
        retry_count: 0,
        layer: item.layer.clone(),
    }
}
