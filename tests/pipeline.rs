//! End-to-end pipeline runs over the SQLite index with a scripted model.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use gap_harness::config::{Config, DbConfig};
use gap_harness::index::{index_items, RetrievalMode, SqliteIndex};
use gap_harness::rcm::IndexItem;
use gap_harness::sink::{load_results, JsonFileSink};
use gap_harness::{db, migrate};
use gap_harness_core::aggregate::{RunStats, RunStatus};
use gap_harness_core::error::{ModelInvocationError, PipelineError};
use gap_harness_core::evaluator::{EvaluationRequest, Evaluator};
use gap_harness_core::models::{
    Collection, EvaluationStatus, GapAnswer, Requirement, Rubric, RubricQuestion, Severity,
};
use gap_harness_core::pipeline::{
    ErrorPolicy, GapPipeline, NoProgress, PipelineConfig, PipelineOptions,
};
use gap_harness_core::retrieval::Retriever;
use serde_json::Map;
use tempfile::TempDir;

/// Reports a gap whenever the question mentions "retained", and claims a
/// high severity even when it reports no gap.
struct RetentionEvaluator {
    seen_facts: Mutex<Vec<(Vec<String>, Vec<String>)>>,
}

#[async_trait]
impl Evaluator for RetentionEvaluator {
    async fn evaluate(
        &self,
        req: &EvaluationRequest<'_>,
    ) -> Result<GapAnswer, ModelInvocationError> {
        self.seen_facts
            .lock()
            .unwrap()
            .push((req.facts.risks.clone(), req.facts.controls.clone()));
        if req.question.contains("timeout") {
            return Err(ModelInvocationError::Request("timed out".into()));
        }
        let gap = req.question.contains("retained");
        Ok(GapAnswer {
            reasoning: "scripted".into(),
            answer: if gap { "yes".into() } else { "no".into() },
            gap_exists: gap,
            remediation: if gap { "Extend retention".into() } else { "No remediation needed".into() },
            gap_severity: Some(Severity::High),
        })
    }
}

fn item(id: &str, collection: Collection, document: &str) -> IndexItem {
    IndexItem {
        id: id.into(),
        collection,
        name: String::new(),
        document: document.into(),
        description: String::new(),
        metadata: Map::new(),
    }
}

async fn indexed(items: &[IndexItem]) -> (TempDir, SqliteIndex) {
    let dir = TempDir::new().unwrap();
    let mut config = Config::minimal();
    config.db = DbConfig {
        path: dir.path().join("gap.sqlite"),
    };
    migrate::run_migrations(&config).await.unwrap();
    let pool = db::connect(&config).await.unwrap();
    index_items(&pool, items, None, 16).await.unwrap();
    (dir, SqliteIndex::new(pool, None, RetrievalMode::Keyword))
}

fn access_logs_requirement(relevant: bool) -> Requirement {
    Requirement {
        is_relevant: relevant,
        id: "REQ-1".into(),
        name: "Log retention".into(),
        description: "Audit logs are retained for one year".into(),
        text: "Access logs must be retained for 1 year".into(),
    }
}

fn rubric(name: &str, questions: &[&str]) -> Rubric {
    Rubric {
        personality: name.into(),
        gap_analysis_rubric: questions
            .iter()
            .map(|q| RubricQuestion {
                question: q.to_string(),
            })
            .collect(),
    }
}

fn evaluator() -> Arc<RetentionEvaluator> {
    Arc::new(RetentionEvaluator {
        seen_facts: Mutex::new(Vec::new()),
    })
}

#[tokio::test]
async fn access_log_scenario_produces_one_record_with_two_judgments() {
    let (dir, index) = indexed(&[
        item("RISK_00_000", Collection::Risks, "Unauthorized access risk"),
        item("CTRL_00_000", Collection::Controls, "Log retention control"),
    ])
    .await;
    let evaluator = evaluator();
    let pipeline = GapPipeline::new(PipelineConfig {
        retriever: Arc::new(index),
        evaluator: evaluator.clone(),
        sink: Arc::new(NoProgress),
        options: PipelineOptions::default(),
    });

    let rubrics = vec![rubric(
        "Directive & Outcome Gap Analysis",
        &["Is the retention period mandated?", "Must logs be retained centrally?"],
    )];
    let result = pipeline
        .run(&[access_logs_requirement(true)], &rubrics)
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.records.len(), 1);
    let record = &result.records[0];
    assert_eq!(record.gap_analysis.len(), 2);
    assert_eq!(record.internal_facts.risks, vec!["Unauthorized access risk"]);
    assert_eq!(record.internal_facts.controls, vec!["Log retention control"]);
    assert!(record.internal_facts.standards.is_empty());
    assert_eq!(record.external_dot_point, "Audit logs are retained for one year");

    // Evaluator saw the same fact bundle for every question.
    let seen = evaluator.seen_facts.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], seen[1]);
    drop(seen);

    let sink = JsonFileSink::new(dir.path().join("results.json"));
    sink.persist(&result).unwrap();
    let reloaded = load_results(sink.path()).unwrap();
    assert_eq!(reloaded, result.records);
    let stats = RunStats::from_records(&reloaded);
    assert_eq!(stats, result.stats);
    assert_eq!(stats.total_questions, 2);
    assert!(stats.total_questions >= stats.total_gaps);
}

#[tokio::test]
async fn no_gap_judgments_never_count_toward_severity() {
    let (_dir, index) = indexed(&[]).await;
    let pipeline = GapPipeline::new(PipelineConfig {
        retriever: Arc::new(index),
        evaluator: evaluator(),
        sink: Arc::new(NoProgress),
        options: PipelineOptions::default(),
    });
    let result = pipeline
        .run(
            &[access_logs_requirement(true)],
            &[rubric("R", &["Is it retained?", "Is it encrypted?", "Is it reviewed?"])],
        )
        .await
        .unwrap();

    let record = &result.records[0];
    assert_eq!(record.gap_analysis[1].gap_answer.gap_severity, Some(Severity::None));
    assert_eq!(result.stats.total_gaps, 1);
    assert_eq!(result.stats.severity.high, 1);
    assert!((result.stats.gap_percentage() - 100.0 / 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn irrelevant_requirement_contributes_nothing() {
    let (_dir, index) = indexed(&[item("RISK_00_000", Collection::Risks, "Access risk")]).await;
    let evaluator = evaluator();
    let pipeline = GapPipeline::new(PipelineConfig {
        retriever: Arc::new(index),
        evaluator: evaluator.clone(),
        sink: Arc::new(NoProgress),
        options: PipelineOptions::default(),
    });
    let result = pipeline
        .run(&[access_logs_requirement(false)], &[rubric("R", &["q"])])
        .await
        .unwrap();
    assert!(result.records.is_empty());
    assert!(evaluator.seen_facts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn empty_index_yields_empty_slots_not_errors() {
    let (_dir, index) = indexed(&[]).await;
    for collection in Collection::ALL {
        let items = index.retrieve(collection, "anything at all", 2).await.unwrap();
        assert!(items.is_empty());
    }
}

#[tokio::test]
async fn retrieval_never_exceeds_limit() {
    let items: Vec<IndexItem> = (0..6)
        .map(|i| item(&format!("RISK_00_{:03}", i), Collection::Risks, "access risk"))
        .collect();
    let (_dir, index) = indexed(&items).await;
    for limit in [1, 2, 5] {
        let found = index.retrieve(Collection::Risks, "access", limit).await.unwrap();
        assert_eq!(found.len(), limit);
    }
}

#[tokio::test]
async fn model_failures_are_marked_unevaluated_and_persisted() {
    let (dir, index) = indexed(&[]).await;
    let pipeline = GapPipeline::new(PipelineConfig {
        retriever: Arc::new(index),
        evaluator: evaluator(),
        sink: Arc::new(NoProgress),
        options: PipelineOptions::default(),
    });
    let result = pipeline
        .run(
            &[access_logs_requirement(true)],
            &[rubric("R", &["Is it retained?", "timeout please"])],
        )
        .await
        .unwrap();

    let sink = JsonFileSink::new(dir.path().join("results.json"));
    sink.persist(&result).unwrap();
    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(sink.path()).unwrap()).unwrap();
    let skipped = &raw[0]["gap_analysis"][1];
    assert_eq!(skipped["status"], "unevaluated");
    assert_eq!(skipped["gap_answer"]["gap_exists"], false);
    assert!(skipped["error"].as_str().unwrap().contains("timed out"));

    let reloaded = load_results(sink.path()).unwrap();
    assert_eq!(reloaded[0].gap_analysis[1].status, EvaluationStatus::Unevaluated);
    assert_eq!(RunStats::from_records(&reloaded).skipped_questions, 1);
}

#[tokio::test]
async fn abort_policy_stops_before_persisting() {
    let (_dir, index) = indexed(&[]).await;
    let pipeline = GapPipeline::new(PipelineConfig {
        retriever: Arc::new(index),
        evaluator: evaluator(),
        sink: Arc::new(NoProgress),
        options: PipelineOptions {
            error_policy: ErrorPolicy::Abort,
            ..Default::default()
        },
    });
    let err = pipeline
        .run(&[access_logs_requirement(true)], &[rubric("R", &["timeout"])])
        .await
        .unwrap_err();
    let PipelineError::Aborted { requirement_id, .. } = err;
    assert_eq!(requirement_id, "REQ-1");
}

#[tokio::test]
async fn reruns_have_identical_shape() {
    let (_dir, index) = indexed(&[item("RISK_00_000", Collection::Risks, "Access logs risk")]).await;
    let pipeline = GapPipeline::new(PipelineConfig {
        retriever: Arc::new(index),
        evaluator: evaluator(),
        sink: Arc::new(NoProgress),
        options: PipelineOptions::default(),
    });
    let rubrics = vec![rubric("A", &["q1", "q2 retained"]), rubric("B", &["q3"])];
    let reqs = [access_logs_requirement(true)];
    let first = pipeline.run(&reqs, &rubrics).await.unwrap();
    let second = pipeline.run(&reqs, &rubrics).await.unwrap();

    let shape = |r: &gap_harness_core::aggregate::RunResult| -> Vec<(String, Vec<String>)> {
        r.records
            .iter()
            .map(|rec| {
                (
                    rec.rubric.clone(),
                    rec.gap_analysis.iter().map(|g| g.question.clone()).collect(),
                )
            })
            .collect()
    };
    assert_eq!(shape(&first), shape(&second));
}
