//! Run statistics over a result file (`gap stats`) and the summary printed
//! at the end of `gap analyze`.

use std::path::Path;

use anyhow::Result;
use gap_harness_core::aggregate::{RecordCoverage, RunStats};

use crate::sink;

pub fn run_stats(path: &Path) -> Result<()> {
    let records = sink::load_results(path)?;
    let stats = RunStats::from_records(&records);
    println!("stats {}", path.display());
    print!("{}", render_summary(&stats));
    Ok(())
}

pub fn render_summary(stats: &RunStats) -> String {
    let mut out = String::new();
    out.push_str(&format!("  total analyses: {}\n", stats.total_analyses));
    out.push_str(&format!("  total gaps: {}\n", stats.total_gaps));
    out.push_str(&format!("  total questions: {}\n", stats.total_questions));
    out.push_str(&format!("  gap percentage: {:.2}%\n", stats.gap_percentage()));
    out.push_str(&format!(
        "  severity: high {}, medium {}, low {}, unrated {}\n",
        stats.severity.high, stats.severity.medium, stats.severity.low, stats.severity.unrated
    ));
    out.push_str(&format!(
        "  evaluated questions: {}\n",
        stats.evaluated_questions()
    ));
    out.push_str(&format!("  skipped questions: {}\n", stats.skipped_questions));
    out
}

/// Per-record coverage table; only records with skipped questions are
/// listed unless `all` is set.
pub fn render_coverage(coverage: &[RecordCoverage], all: bool) -> String {
    let mut out = String::new();
    let rows: Vec<&RecordCoverage> = coverage
        .iter()
        .filter(|c| all || c.skipped > 0)
        .collect();
    if rows.is_empty() {
        return out;
    }
    out.push_str("  coverage (evaluated / skipped):\n");
    for row in rows {
        out.push_str(&format!(
            "    {}  {}  {} / {}\n",
            row.requirement_id, row.rubric, row.evaluated, row.skipped
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use gap_harness_core::aggregate::SeverityCounts;

    #[test]
    fn summary_reports_percentage_and_severities() {
        let stats = RunStats {
            total_analyses: 4,
            total_gaps: 2,
            total_questions: 8,
            skipped_questions: 1,
            severity: SeverityCounts {
                high: 1,
                medium: 2,
                low: 0,
                unrated: 0,
            },
        };
        let text = render_summary(&stats);
        assert!(text.contains("gap percentage: 25.00%"));
        assert!(text.contains("severity: high 1, medium 2, low 0, unrated 0"));
        assert!(text.contains("evaluated questions: 7"));
    }

    #[test]
    fn empty_run_reports_zero_percent() {
        assert!(render_summary(&RunStats::default()).contains("gap percentage: 0.00%"));
    }

    #[test]
    fn coverage_lists_only_incomplete_records_by_default() {
        let coverage = vec![
            RecordCoverage {
                requirement_id: "R1".into(),
                rubric: "A".into(),
                evaluated: 3,
                skipped: 0,
            },
            RecordCoverage {
                requirement_id: "R2".into(),
                rubric: "A".into(),
                evaluated: 1,
                skipped: 2,
            },
        ];
        let text = render_coverage(&coverage, false);
        assert!(!text.contains("R1"));
        assert!(text.contains("R2  A  1 / 2"));
        assert_eq!(render_coverage(&coverage, true).lines().count(), 3);
    }
}
