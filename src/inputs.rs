//! Loading the requirement and rubric files consumed by `gap analyze`.

use std::path::Path;

use anyhow::{Context, Result};
use gap_harness_core::models::{Requirement, Rubric};
use serde::de::DeserializeOwned;
use tracing::warn;

fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {} file: {}", what, path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {} file: {}", what, path.display()))
}

/// Requirements in input order, as written by `gap extract`.
pub fn load_requirements(path: &Path) -> Result<Vec<Requirement>> {
    read_json(path, "requirements")
}

/// Rubrics in file order. Rubrics without questions are kept (they
/// produce empty records) but logged.
pub fn load_rubrics(path: &Path) -> Result<Vec<Rubric>> {
    let rubrics: Vec<Rubric> = read_json(path, "rubrics")?;
    for rubric in rubrics.iter().filter(|r| r.is_empty()) {
        warn!(rubric = %rubric.personality, "rubric has no questions");
    }
    Ok(rubrics)
}
