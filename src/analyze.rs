//! `gap analyze`: wire the SQLite index, the chat model, and the progress
//! sink into the pipeline, then persist and summarise the run.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use gap_harness_core::aggregate::{RunResult, RunStatus};
use gap_harness_core::pipeline::{CancellationToken, GapPipeline, PipelineConfig};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::index::SqliteIndex;
use crate::inputs;
use crate::llm;
use crate::progress::ProgressMode;
use crate::sink::{self, JsonFileSink};
use crate::stats;

/// Command-line overrides for one run.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    pub requirement_limit: Option<usize>,
    pub progress: Option<ProgressMode>,
    pub output: Option<PathBuf>,
    pub delay_ms: Option<u64>,
    pub show_coverage: bool,
}

pub async fn run_analyze(config: &Config, opts: AnalyzeOptions) -> Result<()> {
    let requirements = inputs::load_requirements(&config.inputs.requirements)?;
    let rubrics = inputs::load_rubrics(&config.inputs.rubrics)?;

    let mut options = config.pipeline_options();
    if opts.requirement_limit.is_some() {
        options.requirement_limit = opts.requirement_limit;
    }
    let delay = Duration::from_millis(opts.delay_ms.unwrap_or(config.progress.record_delay_ms));
    let mode = opts.progress.unwrap_or_else(ProgressMode::default_for_tty);
    let sink = JsonFileSink::new(
        opts.output
            .clone()
            .unwrap_or_else(|| config.output.results.clone()),
    );

    let index = Arc::new(SqliteIndex::open(config).await?);
    let pipeline = GapPipeline::new(PipelineConfig {
        retriever: index.clone(),
        evaluator: llm::create_evaluator(&config.model)?,
        sink: mode.sink(delay),
        options,
    });

    let run_id = Uuid::new_v4();
    let started_at = chrono::Utc::now();
    info!(
        run_id = %run_id,
        started_at = %started_at.to_rfc3339(),
        model = %config.model.model,
        provider = %config.model.provider,
        "run started"
    );

    let token = pipeline.cancellation();
    spawn_ctrl_c_handler(token.clone());

    let outcome = pipeline.run(&requirements, &rubrics).await;
    index.close().await;
    let result = outcome.with_context(|| format!("run {} failed", run_id))?;

    let fallback = sink::fallback_path(fallback_dir(config), &run_id.to_string());
    if let Err(e) = sink.persist_or_fallback(&result, &fallback) {
        print_report(&result, None, opts.show_coverage);
        return Err(e).with_context(|| format!("run {} could not be saved", run_id));
    }

    let elapsed = chrono::Utc::now() - started_at;
    info!(
        run_id = %run_id,
        status = ?result.status,
        elapsed_ms = elapsed.num_milliseconds(),
        "run finished"
    );

    print_report(&result, Some(sink.path()), opts.show_coverage);
    Ok(())
}

/// Directory for rescued results: the database directory, which `gap`
/// already writes to.
fn fallback_dir(config: &Config) -> &Path {
    config
        .db
        .path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
}

/// Exit status for a run killed by a second interrupt (128 + SIGINT).
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// The first Ctrl-C cancels cooperatively; the pipeline stops before the
/// next question and the partial result is still saved. A second Ctrl-C
/// exits immediately, even mid-request.
fn spawn_ctrl_c_handler(token: CancellationToken) {
    tokio::spawn(async move {
        if let Some(code) = watch_interrupts(tokio::signal::ctrl_c, token).await {
            std::process::exit(code);
        }
    });
}

/// Wait for interrupts from `next_signal`. Returns the exit code to use
/// once a second interrupt arrives, or `None` if signals stop.
async fn watch_interrupts<F, Fut>(mut next_signal: F, token: CancellationToken) -> Option<i32>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    next_signal().await.ok()?;
    warn!("interrupt received; finishing current question and saving partial results (Ctrl-C again to quit now)");
    token.cancel();

    next_signal().await.ok()?;
    error!("second interrupt; exiting without saving");
    Some(INTERRUPTED_EXIT_CODE)
}

fn print_report(result: &RunResult, saved_to: Option<&Path>, show_all_coverage: bool) {
    let status = match result.status {
        RunStatus::Completed => "completed",
        RunStatus::Cancelled => "cancelled",
    };
    println!("analyze {}", status);
    print!("{}", stats::render_summary(&result.stats));
    print!(
        "{}",
        stats::render_coverage(&result.coverage(), show_all_coverage)
    );
    if let Some(path) = saved_to {
        println!("  saved to {}", path.display());
    }
}
