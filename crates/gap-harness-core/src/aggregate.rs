//! Gap aggregation: per-record assembly and run-level statistics.
//!
//! Two different units are counted and both are kept:
//! - `total_gaps` counts **records** with at least one evaluated gap.
//! - per-severity counts tally **individual judgments** with a gap.

use serde::Serialize;

use crate::models::{FactBundle, GapAnalysis, GapAnalysisRecord, Requirement, Rubric, Severity};

/// Combine the judgments for one (requirement, rubric) pair into a record.
///
/// `judgments` must be in rubric order, one per question. No reordering or
/// deduplication happens here.
pub fn aggregate(
    requirement: &Requirement,
    requirement_id: &str,
    rubric: &Rubric,
    facts: &FactBundle,
    judgments: Vec<GapAnalysis>,
    retrieval_failures: usize,
) -> GapAnalysisRecord {
    debug_assert_eq!(judgments.len(), rubric.len());
    GapAnalysisRecord {
        requirement_id: requirement_id.to_string(),
        rubric: rubric.personality.clone(),
        requirement: requirement.text.clone(),
        internal_facts: facts.clone(),
        external_dot_point: requirement.description.clone(),
        gap_analysis: judgments,
        retrieval_failures,
    }
}

/// Per-severity tallies of individual gap judgments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeverityCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    /// Gaps the model reported without a usable severity.
    pub unrated: usize,
}

impl SeverityCounts {
    fn add(&mut self, severity: Severity) {
        match severity {
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
            Severity::None => self.unrated += 1,
        }
    }
}

/// Run-level statistics over a sequence of records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub total_analyses: usize,
    /// Records with at least one gap.
    pub total_gaps: usize,
    pub total_questions: usize,
    /// Questions that were skipped because the model call failed.
    pub skipped_questions: usize,
    pub severity: SeverityCounts,
}

impl RunStats {
    pub fn from_records(records: &[GapAnalysisRecord]) -> Self {
        let mut stats = Self::default();
        for record in records {
            stats.push(record);
        }
        stats
    }

    /// Fold one more record into the totals.
    pub fn push(&mut self, record: &GapAnalysisRecord) {
        self.total_analyses += 1;
        self.total_questions += record.gap_analysis.len();
        self.skipped_questions += record.skipped_count();
        if record.has_gap() {
            self.total_gaps += 1;
        }
        for ga in record.gap_analysis.iter().filter(|ga| ga.is_gap()) {
            self.severity.add(ga.gap_answer.effective_severity());
        }
    }

    /// Percentage of questions with gaps, `total_gaps / total_questions`.
    ///
    /// Returns `0.0` when no questions were analysed.
    pub fn gap_percentage(&self) -> f64 {
        if self.total_questions == 0 {
            0.0
        } else {
            self.total_gaps as f64 / self.total_questions as f64 * 100.0
        }
    }

    pub fn evaluated_questions(&self) -> usize {
        self.total_questions - self.skipped_questions
    }
}

/// Terminal state of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Cancelled,
}

/// Coverage for one record: how many questions were answered vs skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordCoverage {
    pub requirement_id: String,
    pub rubric: String,
    pub evaluated: usize,
    pub skipped: usize,
}

/// The full output of one pipeline invocation.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub records: Vec<GapAnalysisRecord>,
    pub stats: RunStats,
    pub status: RunStatus,
}

impl RunResult {
    pub fn new(records: Vec<GapAnalysisRecord>, status: RunStatus) -> Self {
        let stats = RunStats::from_records(&records);
        Self {
            records,
            stats,
            status,
        }
    }

    pub fn coverage(&self) -> Vec<RecordCoverage> {
        self.records
            .iter()
            .map(|r| RecordCoverage {
                requirement_id: r.requirement_id.clone(),
                rubric: r.rubric.clone(),
                evaluated: r.evaluated_count(),
                skipped: r.skipped_count(),
            })
            .collect()
    }
}
