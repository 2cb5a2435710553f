//! Core data models for gap analysis.
//!
//! These types mirror the JSON shapes exchanged with the outside world:
//! requirement lists produced by extraction, rubric lists, and the result
//! file written at the end of a run.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

/// A named collection in the vector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Processes,
    Standards,
    Requirements,
    Controls,
    Risks,
}

impl Collection {
    /// All collections, in indexing order.
    pub const ALL: [Collection; 5] = [
        Collection::Processes,
        Collection::Standards,
        Collection::Requirements,
        Collection::Controls,
        Collection::Risks,
    ];

    /// The three collections queried to build a [`FactBundle`], in query order.
    pub const FACTS: [Collection; 3] = [Collection::Risks, Collection::Controls, Collection::Standards];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processes => "processes",
            Self::Standards => "standards",
            Self::Requirements => "requirements",
            Self::Controls => "controls",
            Self::Risks => "risks",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "processes" => Ok(Self::Processes),
            "standards" => Ok(Self::Standards),
            "requirements" => Ok(Self::Requirements),
            "controls" => Ok(Self::Controls),
            "risks" => Ok(Self::Risks),
            other => Err(format!(
                "unknown collection '{}'. Must be one of processes, standards, requirements, controls, risks",
                other
            )),
        }
    }
}

/// A single compliance obligation extracted from an external document.
///
/// `description` is the "external dot point" the internal facts are
/// compared against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    #[serde(rename = "isRelevantforStandard", default)]
    pub is_relevant: bool,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub text: String,
}

impl Requirement {
    /// Identifier for logs: the requirement id, or its position when unset.
    pub fn label(&self, index: usize) -> String {
        if self.id.trim().is_empty() {
            format!("#{}", index + 1)
        } else {
            self.id.clone()
        }
    }
}

/// One item returned by the retrieval adapter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedItem {
    pub document: String,
    pub description: String,
}

/// Internal evidence retrieved for one requirement.
///
/// Always has exactly the three named slots; any of them may be empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactBundle {
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub controls: Vec<String>,
    #[serde(default)]
    pub standards: Vec<String>,
}

impl FactBundle {
    pub fn slot_mut(&mut self, collection: Collection) -> Option<&mut Vec<String>> {
        match collection {
            Collection::Risks => Some(&mut self.risks),
            Collection::Controls => Some(&mut self.controls),
            Collection::Standards => Some(&mut self.standards),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.risks.is_empty() && self.controls.is_empty() && self.standards.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricQuestion {
    pub question: String,
}

/// A named analytical perspective with its ordered questions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rubric {
    pub personality: String,
    #[serde(default)]
    pub gap_analysis_rubric: Vec<RubricQuestion>,
}

impl Rubric {
    pub fn questions(&self) -> impl Iterator<Item = &str> {
        self.gap_analysis_rubric.iter().map(|q| q.question.as_str())
    }

    pub fn len(&self) -> usize {
        self.gap_analysis_rubric.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gap_analysis_rubric.is_empty()
    }
}

/// Impact rating of a detected gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
    None,
}

impl Severity {
    /// Lenient parse of model output. Anything unrecognised reads as no gap.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" | "critical" => Self::High,
            "medium" | "moderate" => Self::Medium,
            "low" | "minor" => Self::Low,
            _ => Self::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::None => "none",
        }
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Severity::parse(&raw))
    }
}

/// The model's structured answer to one rubric question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapAnswer {
    pub reasoning: String,
    pub answer: String,
    pub gap_exists: bool,
    pub remediation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gap_severity: Option<Severity>,
}

impl GapAnswer {
    /// Force the severity to read as "no gap" when no gap was found.
    pub fn normalized(mut self) -> Self {
        if !self.gap_exists {
            self.gap_severity = Some(Severity::None);
        }
        self
    }

    /// Severity that counts toward statistics: none unless a gap exists.
    pub fn effective_severity(&self) -> Severity {
        if self.gap_exists {
            self.gap_severity.unwrap_or(Severity::None)
        } else {
            Severity::None
        }
    }

    /// Placeholder recorded when the question could not be evaluated.
    pub fn unevaluated() -> Self {
        Self {
            reasoning: String::new(),
            answer: "unevaluated".to_string(),
            gap_exists: false,
            remediation: String::new(),
            gap_severity: None,
        }
    }
}

/// Whether a question was actually answered by the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationStatus {
    #[default]
    Evaluated,
    Unevaluated,
}

/// One rubric question paired with its judgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapAnalysis {
    pub question: String,
    pub gap_answer: GapAnswer,
    #[serde(default)]
    pub status: EvaluationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GapAnalysis {
    pub fn evaluated(question: impl Into<String>, answer: GapAnswer) -> Self {
        Self {
            question: question.into(),
            gap_answer: answer.normalized(),
            status: EvaluationStatus::Evaluated,
            error: None,
        }
    }

    pub fn unevaluated(question: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            gap_answer: GapAnswer::unevaluated(),
            status: EvaluationStatus::Unevaluated,
            error: Some(error.into()),
        }
    }

    /// A genuine, evaluated gap.
    pub fn is_gap(&self) -> bool {
        self.status == EvaluationStatus::Evaluated && self.gap_answer.gap_exists
    }
}

/// All judgments for one (requirement, rubric) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapAnalysisRecord {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub requirement_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rubric: String,
    pub requirement: String,
    pub internal_facts: FactBundle,
    pub external_dot_point: String,
    pub gap_analysis: Vec<GapAnalysis>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub retrieval_failures: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl GapAnalysisRecord {
    /// True when any evaluated question found a gap.
    pub fn has_gap(&self) -> bool {
        self.gap_analysis.iter().any(GapAnalysis::is_gap)
    }

    pub fn evaluated_count(&self) -> usize {
        self.gap_analysis
            .iter()
            .filter(|g| g.status == EvaluationStatus::Evaluated)
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.gap_analysis.len() - self.evaluated_count()
    }
}
