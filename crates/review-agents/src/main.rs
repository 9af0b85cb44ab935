use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use review_agents::backends::{CliInvoker, CliTranslator};
use review_agents::config::{self, Cli, EnvOverrides, FileConfig, OutputFormat};
use review_agents::context::resolve_context;
use review_coordination::{FileMemoStore, Orchestrator, ReviewRequest};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries only the report.
    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let resolved = config::resolve(&cli, file, &EnvOverrides::from_env())?;

    let repo_root = std::env::current_dir().context("Failed to determine working directory")?;
    let context_text = resolve_context(resolved.context_mode, resolved.cached, &repo_root).await?;
    let memo_dir = repo_root.join(&resolved.memo_dir);

    info!(
        context_mode = %resolved.context_mode,
        reviewers = resolved.run.reviewers.len(),
        arbiter = %resolved.run.arbiter.identity,
        mode = %resolved.run.arbiter.mode,
        memo_dir = %memo_dir.display(),
        shell_timeout_secs = resolved.shell_timeout.as_secs(),
        "multi-review starting"
    );

    let invoker = CliInvoker::new(&repo_root, resolved.shell_timeout);
    let mut orchestrator = Orchestrator::new(
        resolved.run.clone(),
        Arc::new(invoker.clone()),
        Arc::new(FileMemoStore::new(memo_dir)),
    );
    if resolved.run.output_language.is_some() {
        orchestrator = orchestrator.with_translator(Arc::new(CliTranslator::new(invoker)));
    }

    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; cancelling review run");
            cancel.cancel();
        }
    });

    let request = ReviewRequest::new(resolved.task.clone(), context_text).with_label(resolved.label.clone());
    let report = orchestrator.run(request).await.context("Review run failed")?;

    match resolved.format {
        OutputFormat::Markdown => println!("{}", report.to_markdown(resolved.run.include_low_priority)),
        OutputFormat::Json => println!("{}", report.to_json()?),
    }
    Ok(())
}
