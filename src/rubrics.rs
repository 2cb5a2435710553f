//! Rubric tooling: `gap rubrics show` and `gap rubrics generate`.

use std::path::Path;

use anyhow::{bail, Context, Result};
use gap_harness_core::error::ModelInvocationError;
use gap_harness_core::models::Rubric;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::Config;
use crate::inputs;
use crate::llm::ChatClient;

/// Analytical perspectives generated when none are given.
pub const DEFAULT_PERSONALITIES: [&str; 4] = [
    "Structural & Contextual Gap Analysis",
    "Relevance & Specificity Gap Analysis",
    "Modality & Possibility Gap Analysis",
    "Directive & Outcome Gap Analysis",
];

/// Print every loaded rubric with its numbered questions.
pub fn run_show(config: &Config) -> Result<()> {
    let rubrics = inputs::load_rubrics(&config.inputs.rubrics)?;
    if rubrics.is_empty() {
        println!("No rubrics in {}.", config.inputs.rubrics.display());
        return Ok(());
    }

    let total: usize = rubrics.iter().map(Rubric::len).sum();
    for rubric in &rubrics {
        println!("{} ({} questions)", rubric.personality, rubric.len());
        for (i, question) in rubric.questions().enumerate() {
            println!("  {:>2}. {}", i + 1, question);
        }
        println!();
    }
    println!(
        "{} rubrics, {} questions total",
        rubrics.len(),
        total
    );
    Ok(())
}

fn system_prompt(personality: &str) -> String {
    format!(
        "Assume that you are given a fact (internal standard requirement/information) and a dot point \
         (external standard/regulation). Your task is to determine if there is a gap between the fact \
         and the dot point. If there is a gap, you will provide a gap analysis question that can be used \
         to determine if there is a gap between the fact and the dot point based on the specific \
         speciality of {}.",
        personality
    )
}

fn user_prompt(personality: &str) -> String {
    format!(
        "Your task is to embody the world's greatest leading expert in language gap analysis between \
         standards and regulations. Your speciality is {}. Now return a rubric and list of questions \
         that would best accomplish your task to fully determine the gap between a fact and a dot point.",
        personality
    )
}

pub fn rubric_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "gap_analysis_rubric": {
                "type": "array",
                "description": "The list of gap analyzing questions based on a specific speciality for gap analysis",
                "items": {
                    "type": "object",
                    "properties": {
                        "question": {
                            "type": "string",
                            "description": "The question that is posed to determine the gap between a fact and a dot point"
                        }
                    },
                    "required": ["question"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["gap_analysis_rubric"],
        "additionalProperties": false
    })
}

#[derive(Deserialize)]
struct GeneratedRubric {
    gap_analysis_rubric: Vec<gap_harness_core::models::RubricQuestion>,
}

/// Ask the model for one rubric.
pub async fn generate_rubric(
    client: &ChatClient,
    personality: &str,
) -> Result<Rubric, ModelInvocationError> {
    let generated: GeneratedRubric = client
        .complete_json(
            &system_prompt(personality),
            &user_prompt(personality),
            "GapAnalysisRubric",
            &rubric_schema(),
        )
        .await?;
    Ok(Rubric {
        personality: personality.to_string(),
        gap_analysis_rubric: generated
            .gap_analysis_rubric
            .into_iter()
            .filter(|q| !q.question.trim().is_empty())
            .collect(),
    })
}

/// Generate one rubric per personality, in order. A failed generation
/// yields an empty rubric for that personality.
pub async fn generate_all(client: &ChatClient, personalities: &[String]) -> Vec<Rubric> {
    let mut rubrics = Vec::with_capacity(personalities.len());
    for personality in personalities {
        match generate_rubric(client, personality).await {
            Ok(rubric) => {
                info!(rubric = %personality, questions = rubric.len(), "rubric generated");
                rubrics.push(rubric);
            }
            Err(e) => {
                warn!(rubric = %personality, error = %e, "rubric generation failed");
                rubrics.push(Rubric {
                    personality: personality.clone(),
                    gap_analysis_rubric: Vec::new(),
                });
            }
        }
    }
    rubrics
}

pub async fn run_generate(
    config: &Config,
    personalities: &[String],
    output: Option<&Path>,
) -> Result<()> {
    let Some(client) = ChatClient::from_config(&config.model)? else {
        bail!("Model provider is disabled. Set [model] provider in config.");
    };
    let personalities: Vec<String> = if personalities.is_empty() {
        DEFAULT_PERSONALITIES.iter().map(|p| p.to_string()).collect()
    } else {
        personalities.to_vec()
    };
    let output = output.unwrap_or(&config.inputs.rubrics);

    let rubrics = generate_all(&client, &personalities).await;
    let json = serde_json::to_string_pretty(&rubrics)?;
    std::fs::write(output, json)
        .with_context(|| format!("Failed to write rubrics file: {}", output.display()))?;

    println!("rubrics generate ({})", client.model());
    for rubric in &rubrics {
        println!("  {}: {} questions", rubric.personality, rubric.len());
    }
    println!("  saved to {}", output.display());
    Ok(())
}
