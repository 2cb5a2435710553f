//! Live progress for `gap analyze`.
//!
//! One line per completed record, emitted on **stderr** so stdout stays
//! parseable for scripts. `--progress` picks the format; the default is
//! human output when stderr is a TTY and nothing otherwise.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gap_harness_core::models::GapAnalysisRecord;
use gap_harness_core::pipeline::{NoProgress, ProgressSink, RunningTotals};

/// Human-friendly progress on stderr:
/// `analyze  3 / 12  REQ-7  Directive & Outcome Gap Analysis  gaps 2/5  skipped 0`.
pub struct StderrProgress;

#[async_trait]
impl ProgressSink for StderrProgress {
    async fn on_record_completed(&self, record: &GapAnalysisRecord, totals: &RunningTotals) {
        let line = human_line(record, totals);
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{}", line);
        let _ = err.flush();
    }
}

fn human_line(record: &GapAnalysisRecord, totals: &RunningTotals) -> String {
    let gaps = record.gap_analysis.iter().filter(|g| g.is_gap()).count();
    format!(
        "analyze  {} / {}  {}  {}  gaps {}/{}  skipped {}",
        format_number(totals.completed as u64),
        format_number(totals.expected as u64),
        record.requirement_id,
        record.rubric,
        gaps,
        record.gap_analysis.len(),
        record.skipped_count(),
    )
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

#[async_trait]
impl ProgressSink for JsonProgress {
    async fn on_record_completed(&self, record: &GapAnalysisRecord, totals: &RunningTotals) {
        let obj = json_event(record, totals);
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

fn json_event(record: &GapAnalysisRecord, totals: &RunningTotals) -> serde_json::Value {
    serde_json::json!({
        "event": "record",
        "requirement_id": record.requirement_id,
        "rubric": record.rubric,
        "questions": record.gap_analysis.len(),
        "evaluated": record.evaluated_count(),
        "skipped": record.skipped_count(),
        "has_gap": record.has_gap(),
        "n": totals.completed,
        "total": totals.expected,
        "stats": totals.stats,
        "record": record,
    })
}

/// Wraps a sink with a fixed pause after each record so a watcher can keep up.
pub struct Paced<S> {
    inner: S,
    delay: Duration,
}

impl<S> Paced<S> {
    pub fn new(inner: S, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl<S: ProgressSink> ProgressSink for Paced<S> {
    async fn on_record_completed(&self, record: &GapAnalysisRecord, totals: &RunningTotals) {
        self.inner.on_record_completed(record, totals).await;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build the sink for this mode, pausing `delay` after each record.
    pub fn sink(&self, delay: Duration) -> Arc<dyn ProgressSink> {
        match self {
            ProgressMode::Off => Arc::new(Paced::new(NoProgress, delay)),
            ProgressMode::Human => Arc::new(Paced::new(StderrProgress, delay)),
            ProgressMode::Json => Arc::new(Paced::new(JsonProgress, delay)),
        }
    }
}
