//! Sequential gap-analysis pipeline.
//!
//! ```text
//! for requirement (relevant only, input order)
//!   ├─ retrieve risks, controls, standards ──▶ FactBundle
//!   └─ for rubric (load order)
//!        └─ for question (rubric order) ──▶ Evaluator ──▶ GapAnalysis
//!        aggregate ──▶ GapAnalysisRecord ──▶ ProgressSink
//! ```
//!
//! One model call or retrieval call is in flight at a time. Cancellation is
//! checked between questions; a rubric interrupted mid-way produces no
//! record, so every emitted record has one judgment per rubric question.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::aggregate::{aggregate, RunResult, RunStats, RunStatus};
use crate::error::{PipelineError, RetrievalError, StageError};
use crate::evaluator::{EvaluationRequest, Evaluator};
use crate::models::{
    Collection, FactBundle, GapAnalysis, GapAnalysisRecord, Requirement, Rubric,
};
use crate::retrieval::{build_fact_bundle, Retriever};

/// What to do when a retrieval or model call fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Log and continue: empty fact slot, or an unevaluated placeholder judgment.
    #[default]
    Skip,
    /// Stop the run at the first failure.
    Abort,
}

/// Tuning knobs for a run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Items fetched per collection when building a fact bundle.
    pub retrieval_limit: usize,
    /// Only consider the first N requirements of the input (before filtering).
    pub requirement_limit: Option<usize>,
    pub error_policy: ErrorPolicy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            retrieval_limit: 2,
            requirement_limit: None,
            error_policy: ErrorPolicy::Skip,
        }
    }
}

/// Shared flag checked between question evaluations.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Running totals handed to the sink after each record.
#[derive(Debug, Clone, Default)]
pub struct RunningTotals {
    /// Records completed so far.
    pub completed: usize,
    /// Records the run will produce if it is not cancelled.
    pub expected: usize,
    pub stats: RunStats,
}

/// Receives records as they complete, in production order.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn on_record_completed(&self, record: &GapAnalysisRecord, totals: &RunningTotals);
}

/// Sink that discards everything.
pub struct NoProgress;

#[async_trait]
impl ProgressSink for NoProgress {
    async fn on_record_completed(&self, _record: &GapAnalysisRecord, _totals: &RunningTotals) {}
}

/// Injected capabilities and options for a [`GapPipeline`].
pub struct PipelineConfig {
    pub retriever: Arc<dyn Retriever>,
    pub evaluator: Arc<dyn Evaluator>,
    pub sink: Arc<dyn ProgressSink>,
    pub options: PipelineOptions,
}

/// The gap-analysis orchestrator.
pub struct GapPipeline {
    config: PipelineConfig,
    cancel: CancellationToken,
}

enum RubricOutcome {
    Done(Vec<GapAnalysis>),
    Cancelled,
}

impl GapPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Requirements the run will visit: the first `requirement_limit`
    /// inputs, filtered to relevant ones, paired with their input index.
    pub fn eligible<'r>(&self, requirements: &'r [Requirement]) -> Vec<(usize, &'r Requirement)> {
        let limit = self
            .config
            .options
            .requirement_limit
            .unwrap_or(requirements.len());
        requirements
            .iter()
            .enumerate()
            .take(limit)
            .filter(|(_, r)| r.is_relevant)
            .collect()
    }

    /// Run the whole pipeline.
    ///
    /// Returns `Ok` with [`RunStatus::Completed`] or [`RunStatus::Cancelled`];
    /// returns [`PipelineError::Aborted`] only under [`ErrorPolicy::Abort`].
    pub async fn run(
        &self,
        requirements: &[Requirement],
        rubrics: &[Rubric],
    ) -> Result<RunResult, PipelineError> {
        let eligible = self.eligible(requirements);
        let mut totals = RunningTotals {
            expected: eligible.len() * rubrics.len(),
            ..Default::default()
        };
        let mut records = Vec::with_capacity(totals.expected);

        info!(
            requirements = requirements.len(),
            eligible = eligible.len(),
            rubrics = rubrics.len(),
            expected_records = totals.expected,
            "gap analysis started"
        );

        let mut cancelled = false;
        'requirements: for (index, requirement) in eligible {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let requirement_id = requirement.label(index);

            let outcome = build_fact_bundle(
                self.config.retriever.as_ref(),
                &requirement.text,
                self.config.options.retrieval_limit,
            )
            .await;
            let retrieval_failures = outcome.failures.len();
            if retrieval_failures > 0 {
                let collections = failed_collections(&outcome.failures);
                if self.config.options.error_policy == ErrorPolicy::Abort {
                    warn!(
                        requirement_id = %requirement_id,
                        collections = %collections,
                        "aborting run on retrieval failure"
                    );
                    if let Some((_, err)) = outcome.failures.into_iter().next() {
                        return Err(PipelineError::Aborted {
                            requirement_id,
                            source: StageError::Retrieval(err),
                        });
                    }
                } else {
                    warn!(
                        requirement_id = %requirement_id,
                        collections = %collections,
                        "retrieval failed; continuing with empty fact slots"
                    );
                }
            }
            let facts = outcome.bundle;

            for rubric in rubrics {
                let judgments = match self
                    .evaluate_rubric(requirement, &requirement_id, rubric, &facts)
                    .await
                {
                    Ok(RubricOutcome::Done(j)) => j,
                    Ok(RubricOutcome::Cancelled) => {
                        cancelled = true;
                        break 'requirements;
                    }
                    Err(source) => {
                        warn!(requirement_id = %requirement_id, error = %source, "aborting run");
                        return Err(PipelineError::Aborted {
                            requirement_id,
                            source,
                        });
                    }
                };

                let record = aggregate(
                    requirement,
                    &requirement_id,
                    rubric,
                    &facts,
                    judgments,
                    retrieval_failures,
                );
                totals.completed += 1;
                totals.stats.push(&record);
                self.config.sink.on_record_completed(&record, &totals).await;
                records.push(record);
            }
        }

        let status = if cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };
        let result = RunResult::new(records, status);
        info!(
            status = ?status,
            analyses = result.stats.total_analyses,
            gaps = result.stats.total_gaps,
            questions = result.stats.total_questions,
            skipped = result.stats.skipped_questions,
            "gap analysis finished"
        );
        Ok(result)
    }

    /// Ask every question of `rubric`, in order, against one requirement.
    async fn evaluate_rubric(
        &self,
        requirement: &Requirement,
        requirement_id: &str,
        rubric: &Rubric,
        facts: &FactBundle,
    ) -> Result<RubricOutcome, StageError> {
        let mut judgments = Vec::with_capacity(rubric.len());

        for (question_index, question) in rubric.questions().enumerate() {
            if self.cancel.is_cancelled() {
                debug!(
                    requirement_id,
                    rubric = %rubric.personality,
                    question_index,
                    "cancelled mid-rubric; dropping partial record"
                );
                return Ok(RubricOutcome::Cancelled);
            }

            let req = EvaluationRequest {
                requirement: &requirement.text,
                facts,
                external: &requirement.description,
                question,
            };

            match self.config.evaluator.evaluate(&req).await {
                Ok(answer) => judgments.push(GapAnalysis::evaluated(question, answer)),
                Err(source) => match self.config.options.error_policy {
                    ErrorPolicy::Skip => {
                        warn!(
                            requirement_id,
                            rubric = %rubric.personality,
                            question_index,
                            error = %source,
                            "question skipped"
                        );
                        judgments.push(GapAnalysis::unevaluated(question, source.to_string()));
                    }
                    ErrorPolicy::Abort => {
                        return Err(StageError::Model {
                            rubric: rubric.personality.clone(),
                            question_index,
                            source,
                        });
                    }
                },
            }
        }

        Ok(RubricOutcome::Done(judgments))
    }
}

/// `"controls: <error>; standards: <error>"`
fn failed_collections(failures: &[(Collection, RetrievalError)]) -> String {
    failures
        .iter()
        .map(|(collection, err)| format!("{}: {}", collection, err))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelInvocationError;
    use crate::memory::InMemoryIndex;
    use crate::models::{EvaluationStatus, GapAnswer, RubricQuestion, Severity};
    use std::sync::Mutex;

    /// Answers "gap" for questions containing "gap", fails for "fail".
    struct ScriptedEvaluator {
        calls: Mutex<Vec<String>>,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    impl ScriptedEvaluator {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                cancel_after: None,
            }
        }
    }

    #[async_trait]
    impl Evaluator for ScriptedEvaluator {
        async fn evaluate(
            &self,
            req: &EvaluationRequest<'_>,
        ) -> Result<GapAnswer, ModelInvocationError> {
            let count = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(req.question.to_string());
                calls.len()
            };
            if let Some((n, token)) = &self.cancel_after {
                if count >= *n {
                    token.cancel();
                }
            }
            if req.question.contains("fail") {
                return Err(ModelInvocationError::Malformed("bad json".into()));
            }
            let gap = req.question.contains("gap");
            Ok(GapAnswer {
                reasoning: "scripted".into(),
                answer: "scripted".into(),
                gap_exists: gap,
                remediation: String::new(),
                gap_severity: Some(if gap { Severity::High } else { Severity::None }),
            })
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<(String, String, usize)>>,
    }

    #[async_trait]
    impl ProgressSink for RecordingSink {
        async fn on_record_completed(&self, record: &GapAnalysisRecord, totals: &RunningTotals) {
            self.seen.lock().unwrap().push((
                record.requirement_id.clone(),
                record.rubric.clone(),
                totals.completed,
            ));
        }
    }

    fn requirement(id: &str, relevant: bool) -> Requirement {
        Requirement {
            is_relevant: relevant,
            id: id.into(),
            name: String::new(),
            description: format!("dot point for {}", id),
            text: format!("requirement {} about access logs", id),
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

    fn pipeline(
        evaluator: Arc<dyn Evaluator>,
        sink: Arc<dyn ProgressSink>,
        options: PipelineOptions,
    ) -> GapPipeline {
        let index = InMemoryIndex::new();
        index.insert(Collection::Risks, "Unauthorized access risk", "");
        GapPipeline::new(PipelineConfig {
            retriever: Arc::new(index),
            evaluator,
            sink,
            options,
        })
    }

    #[tokio::test]
    async fn records_follow_requirement_then_rubric_order() {
        let sink = Arc::new(RecordingSink::default());
        let p = pipeline(
            Arc::new(ScriptedEvaluator::new()),
            sink.clone(),
            PipelineOptions::default(),
        );
        let reqs = vec![requirement("A", true), requirement("B", false), requirement("C", true)];
        let rubrics = vec![rubric("R1", &["q1", "is there a gap"]), rubric("R2", &["q3"])];

        let result = p.run(&reqs, &rubrics).await.unwrap();
        assert_eq!(result.status, RunStatus::Completed);
        let seen = sink.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                ("A".to_string(), "R1".to_string(), 1),
                ("A".to_string(), "R2".to_string(), 2),
                ("C".to_string(), "R1".to_string(), 3),
                ("C".to_string(), "R2".to_string(), 4),
            ]
        );
        for record in &result.records {
            let expected = rubrics
                .iter()
                .find(|r| r.personality == record.rubric)
                .unwrap()
                .len();
            assert_eq!(record.gap_analysis.len(), expected);
        }
        assert_eq!(result.stats.total_gaps, 2);
        assert_eq!(result.stats.severity.high, 2);
        assert_eq!(result.records[0].internal_facts.risks, vec!["Unauthorized access risk"]);
    }

    #[tokio::test]
    async fn requirement_limit_applies_before_relevance_filter() {
        let p = pipeline(
            Arc::new(ScriptedEvaluator::new()),
            Arc::new(NoProgress),
            PipelineOptions {
                requirement_limit: Some(2),
                ..Default::default()
            },
        );
        let reqs = vec![requirement("A", false), requirement("B", true), requirement("C", true)];
        let result = p.run(&reqs, &[rubric("R", &["q"])]).await.unwrap();
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].requirement_id, "B");
    }

    #[tokio::test]
    async fn model_failure_is_skipped_with_placeholder() {
        let p = pipeline(
            Arc::new(ScriptedEvaluator::new()),
            Arc::new(NoProgress),
            PipelineOptions::default(),
        );
        let result = p
            .run(&[requirement("A", true)], &[rubric("R", &["gap?", "fail here"])])
            .await
            .unwrap();
        let record = &result.records[0];
        assert_eq!(record.gap_analysis.len(), 2);
        assert_eq!(record.gap_analysis[1].status, EvaluationStatus::Unevaluated);
        assert_eq!(record.skipped_count(), 1);
        assert_eq!(result.stats.skipped_questions, 1);
    }

    #[tokio::test]
    async fn model_failure_aborts_under_abort_policy() {
        let sink = Arc::new(RecordingSink::default());
        let p = pipeline(
            Arc::new(ScriptedEvaluator::new()),
            sink.clone(),
            PipelineOptions {
                error_policy: ErrorPolicy::Abort,
                ..Default::default()
            },
        );
        let reqs = vec![requirement("A", true)];
        let rubrics = vec![rubric("ok", &["q"]), rubric("bad", &["q", "fail"])];
        let err = p.run(&reqs, &rubrics).await.unwrap_err();
        match err {
            PipelineError::Aborted {
                requirement_id,
                source: StageError::Model { rubric, question_index, .. },
            } => {
                assert_eq!(requirement_id, "A");
                assert_eq!(rubric, "bad");
                assert_eq!(question_index, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // The record completed before the abort was still streamed.
        assert_eq!(sink.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn retrieval_failure_aborts_under_abort_policy() {
        let index = InMemoryIndex::new();
        index.fail_on(Collection::Standards);
        let p = GapPipeline::new(PipelineConfig {
            retriever: Arc::new(index),
            evaluator: Arc::new(ScriptedEvaluator::new()),
            sink: Arc::new(NoProgress),
            options: PipelineOptions {
                error_policy: ErrorPolicy::Abort,
                ..Default::default()
            },
        });
        let err = p
            .run(&[requirement("A", true)], &[rubric("R", &["q"])])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Aborted {
                source: StageError::Retrieval(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn retrieval_failure_is_counted_under_skip_policy() {
        let index = InMemoryIndex::new();
        index.fail_on(Collection::Controls);
        let p = GapPipeline::new(PipelineConfig {
            retriever: Arc::new(index),
            evaluator: Arc::new(ScriptedEvaluator::new()),
            sink: Arc::new(NoProgress),
            options: PipelineOptions::default(),
        });
        let result = p
            .run(&[requirement("A", true)], &[rubric("R", &["q"])])
            .await
            .unwrap();
        assert_eq!(result.records[0].retrieval_failures, 1);
        assert_eq!(result.records[0].evaluated_count(), 1);
    }

    #[test]
    fn failed_collections_names_each_slot_and_its_error() {
        let failures = vec![
            (Collection::Risks, RetrievalError::Unavailable("db locked".into())),
            (Collection::Standards, RetrievalError::Unavailable("db locked".into())),
        ];
        let text = failed_collections(&failures);
        assert!(text.starts_with("risks: "), "{}", text);
        assert!(text.contains("; standards: "));
        assert!(text.contains("db locked"));
    }

    #[tokio::test]
    async fn cancellation_drops_partial_rubric() {
        let token = CancellationToken::new();
        let evaluator = ScriptedEvaluator {
            calls: Mutex::new(Vec::new()),
            cancel_after: Some((3, token.clone())),
        };
        let p = pipeline(Arc::new(evaluator), Arc::new(NoProgress), PipelineOptions::default())
            .with_cancellation(token);
        let reqs = vec![requirement("A", true), requirement("B", true)];
        let rubrics = vec![rubric("R1", &["q1", "q2"]), rubric("R2", &["q3", "q4"])];

        let result = p.run(&reqs, &rubrics).await.unwrap();
        assert_eq!(result.status, RunStatus::Cancelled);
        // R1 finished (2 calls); R2 was cancelled after its first question.
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].rubric, "R1");
    }

    #[tokio::test]
    async fn empty_rubric_list_produces_empty_run() {
        let p = pipeline(
            Arc::new(ScriptedEvaluator::new()),
            Arc::new(NoProgress),
            PipelineOptions::default(),
        );
        let result = p.run(&[requirement("A", true)], &[]).await.unwrap();
        assert_eq!(result.stats.total_analyses, 0);
        assert_eq!(result.stats.total_questions, 0);
        assert_eq!(result.stats.gap_percentage(), 0.0);
    }
}
