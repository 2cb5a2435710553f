//! Durable result storage.
//!
//! The result file is a pretty-printed JSON array of records. It is written
//! to a sibling temp file first and renamed into place, so a failed write
//! never leaves a truncated document behind. When the configured path
//! cannot be written at all, `gap analyze` saves the run next to the
//! database instead (see [`JsonFileSink::persist_or_fallback`]).

use std::path::{Path, PathBuf};

use anyhow::Context;
use gap_harness_core::aggregate::RunResult;
use gap_harness_core::error::PersistenceError;
use gap_harness_core::models::GapAnalysisRecord;
use thiserror::Error;
use tracing::{error, info};

/// The result file could not be written.
#[derive(Debug, Error)]
pub enum SaveFailure {
    #[error("{error}; records saved to {} instead", .saved_to.display())]
    Recovered {
        error: PersistenceError,
        saved_to: PathBuf,
    },

    #[error("{error}; writing {} failed too: {fallback_error}", .fallback.display())]
    Lost {
        error: PersistenceError,
        fallback: PathBuf,
        fallback_error: PersistenceError,
    },
}

/// `<dir>/gap-results-<run_id>.json`
pub fn fallback_path(dir: &Path, run_id: &str) -> PathBuf {
    dir.join(format!("gap-results-{}.json", run_id))
}

pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write every record of `result`, replacing any previous file.
    pub fn persist(&self, result: &RunResult) -> Result<(), PersistenceError> {
        let json = serde_json::to_string_pretty(&result.records)?;
        let io_err = |source: std::io::Error| PersistenceError::Io {
            path: self.path.display().to_string(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;

        info!(
            path = %self.path.display(),
            records = result.records.len(),
            "results persisted"
        );
        Ok(())
    }

    /// Persist `result`, or write it to `fallback` when the configured file
    /// cannot be written. Either way a failure is still returned.
    pub fn persist_or_fallback(&self, result: &RunResult, fallback: &Path) -> Result<(), SaveFailure> {
        let Err(error) = self.persist(result) else {
            return Ok(());
        };
        error!(path = %self.path.display(), error = %error, "results could not be saved");

        match JsonFileSink::new(fallback).persist(result) {
            Ok(()) => Err(SaveFailure::Recovered {
                error,
                saved_to: fallback.to_path_buf(),
            }),
            Err(fallback_error) => Err(SaveFailure::Lost {
                error,
                fallback: fallback.to_path_buf(),
                fallback_error,
            }),
        }
    }
}

/// Read a result file written by [`JsonFileSink::persist`].
pub fn load_results(path: &Path) -> anyhow::Result<Vec<GapAnalysisRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read results file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse results file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gap_harness_core::aggregate::RunStatus;
    use gap_harness_core::models::{FactBundle, GapAnalysis, GapAnswer, Severity};
    use tempfile::TempDir;

    fn record() -> GapAnalysisRecord {
        GapAnalysisRecord {
            requirement_id: "R1".into(),
            rubric: "Directive & Outcome Gap Analysis".into(),
            requirement: "Encrypt data at rest".into(),
            internal_facts: FactBundle {
                risks: vec!["Data theft".into()],
                controls: vec![],
                standards: vec!["Crypto Standard - AES-256".into()],
            },
            external_dot_point: "Covered entities shall encrypt nonpublic information".into(),
            gap_analysis: vec![GapAnalysis::evaluated(
                "Is encryption mandated?",
                GapAnswer {
                    reasoning: "r".into(),
                    answer: "a".into(),
                    gap_exists: true,
                    remediation: "Mandate AES".into(),
                    gap_severity: Some(Severity::Medium),
                },
            )],
            retrieval_failures: 0,
        }
    }

    #[test]
    fn persisted_file_uses_result_document_shape() {
        let dir = TempDir::new().unwrap();
        let sink = JsonFileSink::new(dir.path().join("out/results.json"));
        let result = RunResult::new(vec![record()], RunStatus::Completed);
        sink.persist(&result).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(sink.path()).unwrap()).unwrap();
        let first = &raw[0];
        assert_eq!(first["requirement"], "Encrypt data at rest");
        assert_eq!(first["internal_facts"]["controls"], serde_json::json!([]));
        assert_eq!(first["gap_analysis"][0]["gap_answer"]["gap_severity"], "medium");
        assert!(first.get("retrieval_failures").is_none());
        assert!(!dir.path().join("out/results.json.tmp").exists());

        assert_eq!(load_results(sink.path()).unwrap(), vec![record()]);
    }

    #[test]
    fn unwritable_target_is_a_persistence_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("blocker"), "").unwrap();
        let sink = JsonFileSink::new(dir.path().join("blocker/results.json"));
        let err = sink
            .persist(&RunResult::new(vec![], RunStatus::Completed))
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Io { .. }));
    }

    #[test]
    fn failed_save_falls_back_and_keeps_judgments() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("blocker"), "").unwrap();
        let sink = JsonFileSink::new(dir.path().join("blocker/results.json"));
        let fallback = fallback_path(dir.path(), "run-1");
        let result = RunResult::new(vec![record()], RunStatus::Completed);

        let err = sink.persist_or_fallback(&result, &fallback).unwrap_err();
        assert!(matches!(err, SaveFailure::Recovered { .. }));
        assert!(err.to_string().contains("gap-results-run-1.json"));

        let recovered = load_results(&fallback).unwrap();
        assert_eq!(recovered, vec![record()]);
        assert_eq!(
            recovered[0].gap_analysis[0].gap_answer.remediation,
            "Mandate AES"
        );
    }

    #[test]
    fn successful_save_leaves_no_fallback() {
        let dir = TempDir::new().unwrap();
        let sink = JsonFileSink::new(dir.path().join("results.json"));
        let fallback = fallback_path(dir.path(), "run-2");
        sink.persist_or_fallback(&RunResult::new(vec![record()], RunStatus::Completed), &fallback)
            .unwrap();
        assert!(sink.path().exists());
        assert!(!fallback.exists());
    }
}
