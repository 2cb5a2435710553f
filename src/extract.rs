//! Requirement extraction from a regulation document (`gap extract`).
//!
//! Two model stages:
//! 1. each page → bullet points `{name, topics, text, description, context, pagenum}`
//! 2. each bullet point → standard requirements
//!    `{isRelevantforStandard, id, name, description, text}`
//!
//! The output is the requirements file consumed by `gap analyze`. A failed
//! model call for one page or bullet point is logged and contributes nothing.

use std::path::Path;

use anyhow::{bail, Context, Result};
use gap_harness_core::error::ModelInvocationError;
use gap_harness_core::models::Requirement;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use crate::llm::ChatClient;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported document type: {0} (expected .pdf or .txt)")]
    UnsupportedType(String),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Read a document as a list of pages.
///
/// PDFs go through `pdf-extract` one page at a time. Text files are read as
/// UTF-8 and split on form feeds; a file without any is one page. Blank
/// pages are dropped.
pub fn read_pages(path: &Path) -> Result<Vec<String>, ExtractError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    let io_err = |source: std::io::Error| ExtractError::Io {
        path: path.display().to_string(),
        source,
    };

    match ext.as_str() {
        "pdf" => {
            let bytes = std::fs::read(path).map_err(io_err)?;
            pdf_pages(&bytes)
        }
        "txt" | "text" | "md" => {
            let text = std::fs::read_to_string(path).map_err(io_err)?;
            Ok(split_pages(&text))
        }
        other => Err(ExtractError::UnsupportedType(other.to_string())),
    }
}

/// Text of each PDF page, in page order.
pub fn pdf_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(pages
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect())
}

pub fn split_pages(text: &str) -> Vec<String> {
    text.split('\u{0c}')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulletPoint {
    pub name: String,
    pub topics: Vec<String>,
    pub text: String,
    pub description: String,
    pub context: String,
    pub pagenum: String,
}

#[derive(Deserialize)]
struct BulletPointList {
    list_bullet_points: Vec<BulletPoint>,
}

#[derive(Deserialize)]
struct RequirementList {
    list_standard_requirements: Vec<Requirement>,
}

pub fn bullet_point_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "list_bullet_points": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string", "description": "Give a name to the bullet point" },
                        "topics": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "The 2-3 word topic names the bullet point belongs to"
                        },
                        "text": { "type": "string", "description": "The exact text from the document used for this bullet point" },
                        "description": { "type": "string", "description": "The description of the bullet point in reference to the document" },
                        "context": { "type": "string", "description": "The context of the bullet point in reference to the document" },
                        "pagenum": { "type": "string", "description": "The page number of the bullet point" }
                    },
                    "required": ["name", "topics", "text", "description", "context", "pagenum"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["list_bullet_points"],
        "additionalProperties": false
    })
}

pub fn requirement_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "list_standard_requirements": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "isRelevantforStandard": { "type": "boolean", "description": "Is the bullet point relevant to become a standard requirement" },
                        "id": { "type": "string", "description": "The ID of the standard requirement" },
                        "name": { "type": "string", "description": "The name of the standard requirement" },
                        "description": { "type": "string", "description": "The description of the standard requirement, including purpose, applicability, and key principles" },
                        "text": { "type": "string", "description": "The text of the standard requirement per the bullet point" }
                    },
                    "required": ["isRelevantforStandard", "id", "name", "description", "text"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["list_standard_requirements"],
        "additionalProperties": false
    })
}

const BULLET_SYSTEM: &str = "You are an expert compliance auditor whose job is to parse a regulation \
    and extract bullet points.";

const REQUIREMENT_SYSTEM: &str = "You are an expert compliance auditor whose job is to parse a \
    regulation and convert each bullet point into a standard requirement. Any bullet point that is \
    not relevant to the regulation should be marked as not relevant for a standard requirement.";

async fn bullet_points_for_page(
    client: &ChatClient,
    page: &str,
) -> Result<Vec<BulletPoint>, ModelInvocationError> {
    let user = format!(
        "You are an expert auditor with extensive knowledge of risk management and compliance. \
         Given a page of the regulation, your task is to mark bullet points for further processing.\n\n\
         The page content is as follows: {}",
        page
    );
    let list: BulletPointList = client
        .complete_json(BULLET_SYSTEM, &user, "ListBulletPoints", &bullet_point_schema())
        .await?;
    Ok(list.list_bullet_points)
}

async fn requirements_for_bullet(
    client: &ChatClient,
    document: &str,
    bullet: &BulletPoint,
) -> Result<Vec<Requirement>, ModelInvocationError> {
    let system = format!("{}\nThe regulation is as follows: {}", REQUIREMENT_SYSTEM, document);
    let bullet_json = serde_json::to_string(bullet)
        .map_err(|e| ModelInvocationError::Malformed(e.to_string()))?;
    let user = format!(
        "You are an expert auditor with extensive knowledge of risk management and compliance. \
         Given a bullet point {}, your task is to analyze whether it should be passed down to the \
         compliance team for their review for further processing.",
        bullet_json
    );
    let list: RequirementList = client
        .complete_json(&system, &user, "ListStandardRequirements", &requirement_schema())
        .await?;
    Ok(list.list_standard_requirements)
}

/// Result of running both stages over a document.
#[derive(Debug, Default)]
pub struct Extraction {
    pub bullet_points: Vec<BulletPoint>,
    pub requirements: Vec<Requirement>,
}

impl Extraction {
    pub fn relevant_count(&self) -> usize {
        self.requirements.iter().filter(|r| r.is_relevant).count()
    }
}

pub async fn extract_requirements(client: &ChatClient, pages: &[String]) -> Extraction {
    let document = pages.join("\n");
    let mut extraction = Extraction::default();

    for (page_index, page) in pages.iter().enumerate() {
        match bullet_points_for_page(client, page).await {
            Ok(points) => {
                info!(page = page_index + 1, bullet_points = points.len(), "page processed");
                extraction.bullet_points.extend(points);
            }
            Err(e) => warn!(page = page_index + 1, error = %e, "bullet point extraction failed"),
        }
    }

    for bullet in &extraction.bullet_points {
        match requirements_for_bullet(client, &document, bullet).await {
            Ok(reqs) => extraction.requirements.extend(reqs),
            Err(e) => warn!(bullet = %bullet.name, error = %e, "requirement generation failed"),
        }
    }

    extraction
}

pub async fn run_extract(config: &Config, input: &Path, output: Option<&Path>) -> Result<()> {
    let Some(client) = ChatClient::from_config(&config.model)? else {
        bail!("Model provider is disabled. Set [model] provider in config.");
    };
    let pages = read_pages(input)?;
    if pages.is_empty() {
        bail!("No text found in {}", input.display());
    }

    let extraction = extract_requirements(&client, &pages).await;
    let output = output.unwrap_or(&config.inputs.requirements);
    let json = serde_json::to_string_pretty(&extraction.requirements)?;
    std::fs::write(output, json)
        .with_context(|| format!("Failed to write requirements file: {}", output.display()))?;

    let relevant = extraction.relevant_count();
    println!("extract {}", input.display());
    println!("  pages: {}", pages.len());
    println!("  bullet points: {}", extraction.bullet_points.len());
    println!("  standard requirements: {}", extraction.requirements.len());
    println!("  relevant: {}", relevant);
    println!("  not relevant: {}", extraction.requirements.len() - relevant);
    println!("  saved to {}", output.display());
    Ok(())
}
