//! Question evaluator seam, prompt construction, and judgment parsing.
//!
//! An [`Evaluator`] turns one rubric question plus its context into a
//! [`GapAnswer`]. The app crate implements it over a chat-model API; the
//! prompt text and the structured-output contract are defined here so
//! every backend sends the same request and validates the same shape.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::ModelInvocationError;
use crate::models::{FactBundle, GapAnswer};

/// System instruction sent with every evaluation.
pub const SYSTEM_PROMPT: &str = "You are an expert in gap analysis between internal standards and external regulations. If a gap exists, provide a detailed remediation plan.";

/// Everything needed to evaluate one question.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationRequest<'a> {
    pub requirement: &'a str,
    pub facts: &'a FactBundle,
    pub external: &'a str,
    pub question: &'a str,
}

/// Chat-style message list for an evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Asks a language model one rubric question.
///
/// Implementations must not mutate local state; the only side effect is
/// the outbound model call.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, req: &EvaluationRequest<'_>) -> Result<GapAnswer, ModelInvocationError>;
}

/// Build the prompt for one evaluation.
pub fn build_prompt(req: &EvaluationRequest<'_>) -> Prompt {
    let user = format!(
        "Analyze the following:\n\
         Requirement: {}\n\
         Internal facts:\n\
         Risks: {}\n\
         Controls: {}\n\
         Standards: {}\n\
         External dot point: {}\n\n\
         Question: {}\n\n\
         Provide a detailed remediation plan if a gap exists.",
        req.requirement,
        req.facts.risks.join(", "),
        req.facts.controls.join(", "),
        req.facts.standards.join(", "),
        req.external,
        req.question,
    );
    Prompt {
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}

/// JSON Schema for the structured judgment the model must return.
pub fn judgment_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "reasoning": {
                "type": "string",
                "description": "The reasoning for the answer"
            },
            "answer": {
                "type": "string",
                "description": "The answer to the gap analysis question given an internal fact and external dot point"
            },
            "gap_exists": {
                "type": "boolean",
                "description": "Whether a gap exists between the internal fact and external dot point"
            },
            "remediation": {
                "type": "string",
                "description": "The remediation suggestion for the gap if it exists, otherwise 'No remediation needed'"
            },
            "gap_severity": {
                "type": "string",
                "enum": ["high", "medium", "low", "none"],
                "description": "The severity of the gap if it exists, otherwise 'none'"
            }
        },
        "required": ["reasoning", "answer", "gap_exists", "remediation", "gap_severity"],
        "additionalProperties": false
    })
}

/// Validate and deserialize raw model output into a [`GapAnswer`].
///
/// Accepts a bare JSON object, optionally wrapped in a fenced code block.
/// Any missing required field or wrong type is a
/// [`ModelInvocationError::Malformed`].
pub fn parse_judgment(raw: &str) -> Result<GapAnswer, ModelInvocationError> {
    let body = strip_code_fence(raw);
    let answer: GapAnswer = serde_json::from_str(body)
        .map_err(|e| ModelInvocationError::Malformed(format!("{}: {}", e, truncate(body, 200))))?;
    Ok(answer.normalized())
}

/// Strip a surrounding ```json fence if present.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}
