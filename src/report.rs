//! Markdown run report.

use crate::error::{Error, Result};
use crate::model::{ProcessingResult, Status};
use crate::orchestrator::{ReportGenerator, ReportMetadata};
use async_trait::async_trait;
use chrono::Utc;
use std::fmt::Write as _;
use std::path::PathBuf;

pub struct MarkdownReport {
    output_dir: PathBuf,
}

impl MarkdownReport {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

/// Pipes and newlines would break a table row.
fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace(['\n', '\r'], " ")
}

fn status_section(out: &mut String, title: &str, rows: &[&ProcessingResult]) {
    if rows.is_empty() {
        return;
    }
    let _ = writeln!(out, "## {title} ({})\n", rows.len());
    let _ = writeln!(
        out,
        "| ID | Name | Code | Layer | Message | Retries | Duration (ms) |"
    );
    let _ = writeln!(out, "|---|---|---|---|---|---|---|");
    for r in rows {
        let message = match &r.error_detail {
            Some(detail) => format!("{} ({detail})", r.message),
            None => r.message.clone(),
        };
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} | {} |",
            cell(r.work_item_id.as_str()),
            cell(&r.work_item_name),
            cell(&r.work_item_code),
            cell(&r.layer),
            cell(&message),
            r.retry_count,
            r.duration_ms
        );
    }
    out.push('\n');
}

#[async_trait]
impl ReportGenerator for MarkdownReport {
    fn generate_markdown_report(
        &self,
        results: &[ProcessingResult],
        metadata: &ReportMetadata,
    ) -> String {
        let mut out = String::new();
        let s = &metadata.summary;
        let p = &metadata.performance;

        let _ = writeln!(out, "# Workflow Tagging Report\n");
        if metadata.dry_run {
            let _ = writeln!(out, "> Dry run: no tags were applied.\n");
        }
        if metadata.cancelled {
            let _ = writeln!(
                out,
                "> Run was interrupted: unprocessed items are listed as failed.\n"
            );
        }

        let _ = writeln!(out, "## Run\n");
        let _ = writeln!(out, "| Field | Value |\n|---|---|");
        let _ = writeln!(out, "| Run ID | {} |", metadata.run_id);
        let _ = writeln!(out, "| Tag | {} |", cell(&metadata.tag_name));
        if let Some(tag_id) = &metadata.tag_id {
            let _ = writeln!(out, "| Tag ID | {} |", cell(tag_id.as_str()));
        }
        let _ = writeln!(out, "| Started | {} |", metadata.started_at.to_rfc3339());
        let _ = writeln!(out, "| Finished | {} |\n", metadata.finished_at.to_rfc3339());

        let _ = writeln!(out, "## Summary\n");
        let _ = writeln!(out, "| Status | Count |\n|---|---|");
        let _ = writeln!(out, "| Total | {} |", s.total);
        let _ = writeln!(out, "| Success | {} |", s.success_count);
        let _ = writeln!(out, "| Failed | {} |", s.failed_count);
        let _ = writeln!(out, "| Skipped | {} |", s.skipped_count);
        let _ = writeln!(out, "| Dry run | {} |\n", s.dry_run_count);

        let _ = writeln!(out, "## Performance\n");
        let _ = writeln!(out, "| Metric | Value |\n|---|---|");
        let _ = writeln!(out, "| Wall clock | {} ms |", p.total_duration_ms);
        let _ = writeln!(out, "| Average per item | {:.1} ms |", p.average_duration_ms);
        let _ = writeln!(out, "| Total retries | {} |", p.total_retries);
        let _ = writeln!(out, "| Speedup | {:.2}x |\n", p.speedup_factor);

        let by_status =
            |status: Status| -> Vec<&ProcessingResult> { results.iter().filter(|r| r.status == status).collect() };
        status_section(&mut out, "Failed", &by_status(Status::Failed));
        status_section(&mut out, "Skipped", &by_status(Status::Skipped));
        status_section(&mut out, "Succeeded", &by_status(Status::Success));
        status_section(&mut out, "Dry run", &by_status(Status::DryRun));

        if !metadata.duplicates.is_empty() {
            let _ = writeln!(out, "## Duplicate names\n");
            for group in &metadata.duplicates {
                let ids: Vec<&str> = group.item_ids.iter().map(|id| id.as_str()).collect();
                let _ = writeln!(out, "- **{}**: {}", cell(&group.display_name), ids.join(", "));
            }
            out.push('\n');
        }

        out
    }

    async fn save_report(&self, content: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| {
                Error::Report(format!(
                    "cannot create report dir {}: {e}",
                    self.output_dir.display()
                ))
            })?;
        let file = format!("tagging-report-{}.md", Utc::now().format("%Y%m%d-%H%M%S"));
        let path = self.output_dir.join(file);
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| Error::Report(format!("cannot write {}: {e}", path.display())))?;
        Ok(path)
    }
}
