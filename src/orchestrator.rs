//! Orchestrator: sequences one tagging run.
//!
//! `ValidateEnvironment → TestConnection → LoadMapping → EnsureTag →
//! ProcessWorkflows → GenerateReport → Done`. Any phase error ends the run
//! with a structured [`ExecutionResult`]; per-item failures inside
//! `ProcessWorkflows` do not.

use crate::api::TagApi;
use crate::batch::{BatchOptions, BatchProcessor};
use crate::clock::Clock;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    BatchOutcome, BatchSummary, ExecutionResult, Phase, PerformanceMetrics, ProcessingResult,
    TagId, WorkItem,
};
use crate::policy::{DuplicateGroup, detect_duplicate_names};
use crate::tags::TagService;
use crate::telemetry::batch::{record_phase, start_run_span};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// What a mapping loader hands back.
#[derive(Debug, Clone, Default)]
pub struct MappingOutcome {
    pub success: bool,
    pub data: Vec<WorkItem>,
    pub errors: Vec<String>,
}

#[async_trait]
pub trait MappingLoader: Send + Sync {
    /// Load the source mapping and turn it into work items for `tag_name`.
    async fn load_and_transform(&self, tag_name: &str) -> MappingOutcome;
}

/// Run-level facts passed to the report generator.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetadata {
    pub run_id: Uuid,
    pub tag_name: String,
    pub tag_id: Option<TagId>,
    pub dry_run: bool,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summary: BatchSummary,
    pub performance: PerformanceMetrics,
    pub duplicates: Vec<DuplicateGroup>,
}

#[async_trait]
pub trait ReportGenerator: Send + Sync {
    fn generate_markdown_report(
        &self,
        results: &[ProcessingResult],
        metadata: &ReportMetadata,
    ) -> String;

    /// Persist a rendered report and return where it went.
    async fn save_report(&self, content: &str) -> Result<PathBuf>;
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Per-run overrides. `None` falls back to [`Config`].
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    pub dry_run: bool,
    pub tag_name: Option<String>,
    pub max_concurrent: Option<usize>,
    pub max_retries: Option<u32>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    config: Arc<Config>,
    api: Arc<dyn TagApi>,
    tags: Arc<TagService>,
    processor: BatchProcessor,
    loader: Arc<dyn MappingLoader>,
    reporter: Arc<dyn ReportGenerator>,
}

/// Accumulates what a run has produced so far.
struct RunState {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    span: tracing::Span,
    errors: Vec<String>,
}

impl RunState {
    fn abort(self, phase: Phase, errors: Vec<String>) -> ExecutionResult {
        error!(%phase, errors = ?errors, "run aborted");
        self.finish(Some(phase), None, None, errors)
    }

    fn finish(
        mut self,
        failed_phase: Option<Phase>,
        outcome: Option<BatchOutcome>,
        report_path: Option<PathBuf>,
        errors: Vec<String>,
    ) -> ExecutionResult {
        self.errors.extend(errors);
        record_phase(&self.span, &Phase::Done.to_string());
        let (results, summary, performance, cancelled) = match outcome {
            Some(o) => (o.results, o.summary, Some(o.performance), o.cancelled),
            None => (Vec::new(), BatchSummary::default(), None, false),
        };
        let success =
            failed_phase.is_none() && !cancelled && summary.failed_count == 0 && self.errors.is_empty();
        ExecutionResult {
            run_id: self.run_id,
            success,
            summary,
            results,
            performance,
            report_path,
            errors: self.errors,
            failed_phase,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

impl Orchestrator {
    /// Build the per-run tag service and batch processor from `config`.
    pub fn new(
        config: Arc<Config>,
        api: Arc<dyn TagApi>,
        clock: Arc<dyn Clock>,
        loader: Arc<dyn MappingLoader>,
        reporter: Arc<dyn ReportGenerator>,
    ) -> Self {
        let tags = Arc::new(TagService::new(
            Arc::clone(&api),
            Arc::clone(&clock),
            Duration::from_millis(config.cache_ttl_ms),
            Duration::from_millis(config.request_timeout_ms),
        ));
        let processor = BatchProcessor::new(Arc::clone(&tags), clock);
        Self {
            config,
            api,
            tags,
            processor,
            loader,
            reporter,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.processor = self.processor.with_cancellation(cancel);
        self
    }

    /// Run every phase. Never returns an error; see [`ExecutionResult`].
    pub async fn execute(&self, options: ExecutionOptions) -> ExecutionResult {
        let run_id = Uuid::new_v4();
        // Both the dry-run lookup and the real create-or-get see this name.
        let tag_name = options
            .tag_name
            .as_deref()
            .unwrap_or(&self.config.tag_name)
            .trim()
            .to_string();
        let span = start_run_span(&run_id, &tag_name, options.dry_run);
        let state = RunState {
            run_id,
            started_at: Utc::now(),
            span: span.clone(),
            errors: Vec::new(),
        };
        self.run_phases(state, options, tag_name)
            .instrument(span)
            .await
    }

    async fn run_phases(
        &self,
        state: RunState,
        options: ExecutionOptions,
        tag_name: String,
    ) -> ExecutionResult {
        info!(run_id = %state.run_id, tag = %tag_name, dry_run = options.dry_run, "run started");

        record_phase(&state.span, &Phase::ValidateEnvironment.to_string());
        if let Err(e) = self.config.validate() {
            return state.abort(Phase::ValidateEnvironment, vec![e.to_string()]);
        }

        record_phase(&state.span, &Phase::TestConnection.to_string());
        if let Err(e) = self.api.ping().await {
            let err = Error::Connectivity(e.to_string());
            return state.abort(Phase::TestConnection, vec![err.to_string()]);
        }
        info!("api reachable");

        record_phase(&state.span, &Phase::LoadMapping.to_string());
        let mapping = self.loader.load_and_transform(&tag_name).await;
        if !mapping.success || mapping.data.is_empty() {
            let mut errors: Vec<String> = mapping
                .errors
                .iter()
                .map(|e| Error::Validation(e.clone()).to_string())
                .collect();
            if errors.is_empty() {
                errors.push(Error::Validation("mapping produced no work items".to_string()).to_string());
            }
            return state.abort(Phase::LoadMapping, errors);
        }
        let items = mapping.data;
        info!(items = items.len(), "mapping loaded");
        let duplicates = detect_duplicate_names(&items);
        for group in &duplicates {
            warn!(
                name = %group.display_name,
                ids = ?group.item_ids,
                "duplicate display name in mapping"
            );
        }

        record_phase(&state.span, &Phase::EnsureTag.to_string());
        let tag_id = match self.resolve_tag(&tag_name, options.dry_run).await {
            Ok(id) => id,
            Err(e) => return state.abort(Phase::EnsureTag, vec![e.to_string()]),
        };

        record_phase(&state.span, &Phase::ProcessWorkflows.to_string());
        let batch_options = BatchOptions {
            dry_run: options.dry_run,
            max_concurrent: options.max_concurrent.unwrap_or(self.config.max_concurrent),
            max_retries: options.max_retries.unwrap_or(self.config.max_retries),
            base_delay: Duration::from_millis(self.config.base_delay_ms),
        };
        let outcome = self
            .processor
            .process_batch(&items, &tag_id, &batch_options)
            .await;

        record_phase(&state.span, &Phase::GenerateReport.to_string());
        let metadata = ReportMetadata {
            run_id: state.run_id,
            tag_name: tag_name.clone(),
            tag_id: if options.dry_run { None } else { Some(tag_id) },
            dry_run: options.dry_run,
            cancelled: outcome.cancelled,
            started_at: state.started_at,
            finished_at: Utc::now(),
            summary: outcome.summary,
            performance: outcome.performance,
            duplicates,
        };
        let content = self
            .reporter
            .generate_markdown_report(&outcome.results, &metadata);
        match self.reporter.save_report(&content).await {
            Ok(path) => {
                info!(path = %path.display(), "report saved");
                let mut errors = Vec::new();
                if outcome.cancelled {
                    errors.push("run cancelled before all items were processed".to_string());
                }
                state.finish(None, Some(outcome), Some(path), errors)
            }
            Err(e) => {
                error!(error = %e, "report could not be saved");
                state.finish(
                    Some(Phase::GenerateReport),
                    Some(outcome),
                    None,
                    vec![e.to_string()],
                )
            }
        }
    }

    /// Create-or-get the run's tag. Dry runs never create it.
    async fn resolve_tag(&self, tag_name: &str, dry_run: bool) -> Result<TagId> {
        if tag_name.is_empty() {
            return Err(Error::Validation("tag name must not be empty".to_string()));
        }
        if !dry_run {
            return Ok(self.tags.ensure_tag_exists(tag_name).await?.id);
        }
        let existing = self
            .tags
            .list_tags()
            .await?
            .into_iter()
            .find(|t| t.name == tag_name);
        match existing {
            Some(tag) => Ok(tag.id),
            None => {
                info!(tag = tag_name, "dry run: tag would be created");
                Ok(TagId::new(format!("(new:{tag_name})")))
            }
        }
    }
}
