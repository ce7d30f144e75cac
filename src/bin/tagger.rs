//! tagger: apply a classification tag to every workflow in a mapping file.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use workflow_tagger::api::HttpTagApi;
use workflow_tagger::clock::SystemClock;
use workflow_tagger::config::Config;
use workflow_tagger::mapping::FileMappingLoader;
use workflow_tagger::orchestrator::{ExecutionOptions, Orchestrator};
use workflow_tagger::report::MarkdownReport;
use workflow_tagger::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Parser)]
#[command(name = "tagger", about = "Tag remote workflows in one bounded batch")]
struct Cli {
    /// Resolve everything but apply no tags
    #[arg(long)]
    dry_run: bool,
    /// Debug-level logging
    #[arg(long, conflicts_with = "quiet")]
    verbose: bool,
    /// Warnings and errors only
    #[arg(long)]
    quiet: bool,
    /// Mapping file (JSON or TOML)
    #[arg(long, default_value = "mapping.json")]
    mapping: PathBuf,
    /// Directory for the Markdown report
    #[arg(long, default_value = "reports")]
    output: PathBuf,
    /// Tag name, overrides TAGGER_TAG_NAME
    #[arg(long)]
    tag: Option<String>,
    /// Worker pool size, overrides TAGGER_MAX_CONCURRENT
    #[arg(long)]
    max_concurrent: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let default_filter = if cli.verbose {
        "debug".to_string()
    } else if cli.quiet {
        "warn".to_string()
    } else {
        config.log_level.clone()
    };
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "workflow-tagger".to_string(),
        default_filter,
        dry_run: cli.dry_run,
    })?;

    let api = Arc::new(HttpTagApi::new(
        &config.api_url,
        &config.api_token,
        Duration::from_millis(config.request_timeout_ms),
    )?);
    let loader = Arc::new(FileMappingLoader::new(
        cli.mapping.clone(),
        config.default_layer.clone(),
    ));
    let reporter = Arc::new(MarkdownReport::new(cli.output.clone()));

    let cancel = CancellationToken::new();
    let orchestrator = Orchestrator::new(
        Arc::new(config),
        api,
        Arc::new(SystemClock::new()),
        loader,
        reporter,
    )
    .with_cancellation(cancel.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight requests");
            cancel.cancel();
        }
    });

    let result = orchestrator
        .execute(ExecutionOptions {
            dry_run: cli.dry_run,
            tag_name: cli.tag,
            max_concurrent: cli.max_concurrent,
            max_retries: None,
        })
        .await;

    let s = &result.summary;
    println!(
        "{}: {} total, {} success, {} failed, {} skipped, {} dry-run",
        if result.success { "OK" } else { "FAILED" },
        s.total,
        s.success_count,
        s.failed_count,
        s.skipped_count,
        s.dry_run_count
    );
    if let Some(path) = &result.report_path {
        println!("Report: {}", path.display());
    }
    for err in &result.errors {
        eprintln!("error: {err}");
    }

    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
