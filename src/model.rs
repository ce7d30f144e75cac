//! Core data model.
//!
//! A work item is one remote workflow record to be tagged. Work items are
//! loaded once per run and never mutated; each one ends the batch with
//! exactly one [`ProcessingResult`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Remote id of a workflow record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItemId(#[serde(deserialize_with = "string_or_number")] pub String);

impl WorkItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Remote id of a tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagId(#[serde(deserialize_with = "string_or_number")] pub String);

impl TagId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TagId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Remote APIs are inconsistent about numeric vs string ids; accept both.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Uint(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
        Raw::Uint(n) => n.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// One record to tag, as produced by the mapping loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub id: WorkItemId,
    /// Original name. Always sent to the API untouched.
    pub name: String,
    pub code: String,
    /// Classification layer (e.g. "A".."F").
    pub layer: String,
    pub tag_name: String,
}

// ---------------------------------------------------------------------------
// Tag
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: TagId,
    pub name: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Final status of one work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Success,
    Skipped,
    Failed,
    DryRun,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Success => "success",
            Status::Skipped => "skipped",
            Status::Failed => "failed",
            Status::DryRun => "dry-run",
        };
        write!(f, "{s}")
    }
}

/// Outcome record for one work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub work_item_id: WorkItemId,
    /// Sanitized for display.
    pub work_item_name: String,
    pub work_item_code: String,
    pub status: Status,
    pub message: String,
    pub error_detail: Option<String>,
    pub duration_ms: u64,
    pub retry_count: u32,
    pub layer: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub dry_run_count: usize,
}

impl BatchSummary {
    pub fn from_results(results: &[ProcessingResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };
        for result in results {
            match result.status {
                Status::Success => summary.success_count += 1,
                Status::Skipped => summary.skipped_count += 1,
                Status::Failed => summary.failed_count += 1,
                Status::DryRun => summary.dry_run_count += 1,
            }
        }
        summary
    }
}

/// Diagnostic timing figures. `speedup_factor` carries no behavioral contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    /// Observed wall-clock time for the whole batch.
    pub total_duration_ms: u64,
    pub average_duration_ms: f64,
    pub total_retries: u32,
    pub speedup_factor: f64,
}

impl PerformanceMetrics {
    pub fn compute(results: &[ProcessingResult], wall_clock_ms: u64) -> Self {
        let sequential_ms: u64 = results.iter().map(|r| r.duration_ms).sum();
        let average_duration_ms = if results.is_empty() {
            0.0
        } else {
            sequential_ms as f64 / results.len() as f64
        };
        let speedup_factor = if wall_clock_ms == 0 {
            1.0
        } else {
            sequential_ms as f64 / wall_clock_ms as f64
        };
        Self {
            total_duration_ms: wall_clock_ms,
            average_duration_ms,
            total_retries: results.iter().map(|r| r.retry_count).sum(),
            speedup_factor,
        }
    }
}

/// Everything `BatchProcessor::process_batch` hands back.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub results: Vec<ProcessingResult>,
    pub summary: BatchSummary,
    pub performance: PerformanceMetrics,
    /// True if the batch stopped early on an operator interrupt.
    pub cancelled: bool,
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Orchestrator phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    ValidateEnvironment,
    TestConnection,
    LoadMapping,
    EnsureTag,
    ProcessWorkflows,
    GenerateReport,
    Done,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::ValidateEnvironment => "validate_environment",
            Phase::TestConnection => "test_connection",
            Phase::LoadMapping => "load_mapping",
            Phase::EnsureTag => "ensure_tag",
            Phase::ProcessWorkflows => "process_workflows",
            Phase::GenerateReport => "generate_report",
            Phase::Done => "done",
        };
        write!(f, "{s}")
    }
}

/// Structured result of a whole orchestrator run. Never an `Err`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub run_id: Uuid,
    pub success: bool,
    pub summary: BatchSummary,
    pub results: Vec<ProcessingResult>,
    pub performance: Option<PerformanceMetrics>,
    pub report_path: Option<PathBuf>,
    pub errors: Vec<String>,
    /// Phase that aborted the run, if any.
    pub failed_phase: Option<Phase>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
