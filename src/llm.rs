//! Chat-model client with structured (JSON-schema) output.
//!
//! Two backends are supported:
//! - **openai**: `POST {url}/chat/completions` with
//!   `response_format = { type: "json_schema", strict: true }`.
//! - **ollama**: `POST {url}/api/chat` with `format = <schema>`.
//!
//! [`LlmEvaluator`] plugs the client into the pipeline's evaluator seam;
//! rubric generation and requirement extraction call
//! [`ChatClient::complete_json`] directly with their own schemas.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use gap_harness_core::error::ModelInvocationError;
use gap_harness_core::evaluator::{
    build_prompt, judgment_schema, parse_judgment, EvaluationRequest, Evaluator,
};
use gap_harness_core::models::GapAnswer;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::ModelConfig;
use crate::http::{post_json, HttpError, JsonEndpoint};

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

#[derive(Debug, Clone)]
enum Backend {
    OpenAi { api_key: String },
    Ollama,
}

/// A configured chat endpoint.
#[derive(Debug, Clone)]
pub struct ChatClient {
    backend: Backend,
    url: String,
    model: String,
    temperature: Option<f32>,
    max_retries: u32,
    client: reqwest::Client,
}

impl ChatClient {
    /// Build a client for `config`, or `None` when the model is disabled.
    pub fn from_config(config: &ModelConfig) -> Result<Option<Self>> {
        if !config.is_enabled() {
            return Ok(None);
        }
        let (backend, url) = match config.provider.as_str() {
            "openai" => {
                let api_key = std::env::var("OPENAI_API_KEY")
                    .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
                let base = config.url.as_deref().unwrap_or(OPENAI_DEFAULT_URL);
                (
                    Backend::OpenAi { api_key },
                    format!("{}/chat/completions", base.trim_end_matches('/')),
                )
            }
            "ollama" => {
                let base = config.url.as_deref().unwrap_or(OLLAMA_DEFAULT_URL);
                (
                    Backend::Ollama,
                    format!("{}/api/chat", base.trim_end_matches('/')),
                )
            }
            other => anyhow::bail!("Unknown model provider: {}", other),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Some(Self {
            backend,
            url,
            model: config.model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
            client,
        }))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send one system + user exchange and return the raw message content,
    /// constrained to `schema`.
    pub async fn complete_raw(
        &self,
        system: &str,
        user: &str,
        schema_name: &str,
        schema: &Value,
    ) -> Result<String, ModelInvocationError> {
        let body = self.request_body(system, user, schema_name, schema);
        let (service, bearer) = match &self.backend {
            Backend::OpenAi { api_key } => ("OpenAI chat", Some(api_key.as_str())),
            Backend::Ollama => ("Ollama chat", None),
        };
        let endpoint = JsonEndpoint {
            service,
            url: &self.url,
            bearer,
        };

        debug!(model = %self.model, schema = schema_name, "model request");
        let response = post_json(&self.client, &endpoint, &body, self.max_retries)
            .await
            .map_err(to_model_error)?;
        extract_content(&self.backend, &response)
    }

    /// Like [`complete_raw`](Self::complete_raw), deserializing the content as `T`.
    pub async fn complete_json<T: DeserializeOwned>(
        &self,
        system: &str,
        user: &str,
        schema_name: &str,
        schema: &Value,
    ) -> Result<T, ModelInvocationError> {
        let raw = self.complete_raw(system, user, schema_name, schema).await?;
        let body = gap_harness_core::evaluator::strip_code_fence(&raw);
        serde_json::from_str(body).map_err(|e| ModelInvocationError::Malformed(e.to_string()))
    }

    fn request_body(&self, system: &str, user: &str, schema_name: &str, schema: &Value) -> Value {
        let messages = json!([
            { "role": "system", "content": system },
            { "role": "user", "content": user }
        ]);
        match self.backend {
            Backend::OpenAi { .. } => {
                let mut body = json!({
                    "model": self.model,
                    "messages": messages,
                    "response_format": {
                        "type": "json_schema",
                        "json_schema": {
                            "name": schema_name,
                            "schema": schema,
                            "strict": true
                        }
                    }
                });
                if let Some(t) = self.temperature {
                    body["temperature"] = json!(t);
                }
                body
            }
            Backend::Ollama => {
                let mut body = json!({
                    "model": self.model,
                    "messages": messages,
                    "stream": false,
                    "format": schema
                });
                if let Some(t) = self.temperature {
                    body["options"] = json!({ "temperature": t });
                }
                body
            }
        }
    }
}

fn to_model_error(err: HttpError) -> ModelInvocationError {
    match err {
        HttpError::Status { status, body, .. } => ModelInvocationError::Backend { status, body },
        HttpError::Transport { .. } => ModelInvocationError::Request(err.to_string()),
        HttpError::Decode { .. } => ModelInvocationError::Malformed(err.to_string()),
    }
}

fn extract_content(backend: &Backend, response: &Value) -> Result<String, ModelInvocationError> {
    let content = match backend {
        Backend::OpenAi { .. } => {
            let message = response
                .pointer("/choices/0/message")
                .ok_or_else(|| ModelInvocationError::Malformed("missing choices[0].message".into()))?;
            if let Some(refusal) = message.get("refusal").and_then(|r| r.as_str()) {
                return Err(ModelInvocationError::Malformed(format!(
                    "model refused: {}",
                    refusal
                )));
            }
            message.get("content")
        }
        Backend::Ollama => response.pointer("/message/content"),
    };
    content
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| ModelInvocationError::Malformed("missing message content".into()))
}

/// Evaluator backed by a chat model.
pub struct LlmEvaluator {
    client: ChatClient,
    schema: Value,
}

impl LlmEvaluator {
    pub fn new(client: ChatClient) -> Self {
        Self {
            client,
            schema: judgment_schema(),
        }
    }
}

#[async_trait]
impl Evaluator for LlmEvaluator {
    async fn evaluate(&self, req: &EvaluationRequest<'_>) -> Result<GapAnswer, ModelInvocationError> {
        let prompt = build_prompt(req);
        let raw = self
            .client
            .complete_raw(&prompt.system, &prompt.user, "GapAnswer", &self.schema)
            .await?;
        parse_judgment(&raw)
    }
}

/// Evaluator used when `[model] provider = "disabled"`: every question
/// fails, so each judgment is recorded as unevaluated.
pub struct DisabledEvaluator;

#[async_trait]
impl Evaluator for DisabledEvaluator {
    async fn evaluate(&self, _req: &EvaluationRequest<'_>) -> Result<GapAnswer, ModelInvocationError> {
        Err(ModelInvocationError::Disabled)
    }
}

pub fn create_evaluator(config: &ModelConfig) -> Result<Arc<dyn Evaluator>> {
    Ok(match ChatClient::from_config(config)? {
        Some(client) => Arc::new(LlmEvaluator::new(client)),
        None => Arc::new(DisabledEvaluator),
    })
}
