//! TOML configuration parsing and validation.
//!
//! Every command reads one file (default `./config/gap.toml`). Sections
//! other than `[db]` are optional and fall back to the defaults below.

use anyhow::{Context, Result};
use gap_harness_core::pipeline::{ErrorPolicy, PipelineOptions};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub inputs: InputsConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputsConfig {
    #[serde(default = "default_requirements_path")]
    pub requirements: PathBuf,
    #[serde(default = "default_rubrics_path")]
    pub rubrics: PathBuf,
    /// Risk-and-control matrix written by `gap rcm generate` and read by `gap index`.
    #[serde(default = "default_rcm_path")]
    pub rcm: PathBuf,
}

impl Default for InputsConfig {
    fn default() -> Self {
        Self {
            requirements: default_requirements_path(),
            rubrics: default_rubrics_path(),
            rcm: default_rcm_path(),
        }
    }
}

fn default_requirements_path() -> PathBuf {
    PathBuf::from("standard_requirements.json")
}
fn default_rubrics_path() -> PathBuf {
    PathBuf::from("gap_analysis_rubrics.json")
}
fn default_rcm_path() -> PathBuf {
    PathBuf::from("rcm_output.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_results_path")]
    pub results: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            results: default_results_path(),
        }
    }
}

fn default_results_path() -> PathBuf {
    PathBuf::from("gap_analysis_results.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_retrieval_limit")]
    pub limit: usize,
    /// `"auto"` (semantic when embeddings are enabled), `"semantic"`, or `"keyword"`.
    #[serde(default = "default_retrieval_mode")]
    pub mode: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            limit: default_retrieval_limit(),
            mode: default_retrieval_mode(),
        }
    }
}

fn default_retrieval_limit() -> usize {
    2
}
fn default_retrieval_mode() -> String {
    "auto".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Expected vector length. Requested from OpenAI and checked on every
    /// response when set.
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_model_retries")]
    pub max_retries: u32,
    #[serde(default = "default_model_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: default_chat_model(),
            url: None,
            temperature: None,
            max_retries: default_model_retries(),
            timeout_secs: default_model_timeout_secs(),
        }
    }
}

impl ModelConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_chat_model() -> String {
    "gpt-4o".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_model_retries() -> u32 {
    2
}
fn default_model_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PipelineConfig {
    /// Analyse only the first N requirements of the input file.
    #[serde(default)]
    pub requirement_limit: Option<usize>,
    #[serde(default)]
    pub on_error: ErrorPolicy,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProgressConfig {
    /// Pause after each streamed record, purely so a watcher can follow along.
    #[serde(default)]
    pub record_delay_ms: u64,
}

impl Config {
    /// Config used when no file exists; only commands that do not touch the
    /// index or the model can run with it.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/gap.sqlite"),
            },
            inputs: InputsConfig::default(),
            output: OutputConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            model: ModelConfig::default(),
            pipeline: PipelineConfig::default(),
            progress: ProgressConfig::default(),
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            retrieval_limit: self.retrieval.limit,
            requirement_limit: self.pipeline.requirement_limit,
            error_policy: self.pipeline.on_error,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Like [`load_config`], but a missing file yields [`Config::minimal`].
/// A file that exists and fails to parse or validate is still an error.
pub fn load_config_or_minimal(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(Config::minimal())
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.retrieval.limit == 0 {
        anyhow::bail!("retrieval.limit must be >= 1");
    }

    match config.retrieval.mode.as_str() {
        "auto" | "keyword" => {}
        "semantic" => {
            if !config.embedding.is_enabled() {
                anyhow::bail!("retrieval.mode = 'semantic' requires an [embedding] provider");
            }
        }
        other => anyhow::bail!(
            "Unknown retrieval mode: '{}'. Must be auto, semantic, or keyword.",
            other
        ),
    }

    if config.embedding.is_enabled() {
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    match config.model.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown model provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    if let Some(t) = config.model.temperature {
        if !(0.0..=2.0).contains(&t) {
            anyhow::bail!("model.temperature must be in [0.0, 2.0]");
        }
    }

    if config.pipeline.requirement_limit == Some(0) {
        anyhow::bail!("pipeline.requirement_limit must be >= 1 when set");
    }

    Ok(())
}
