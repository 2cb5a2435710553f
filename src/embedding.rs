//! Embedding providers for the local index.
//!
//! | Config value | Provider |
//! |--------------|----------|
//! | `"disabled"` | none; the index falls back to keyword scoring |
//! | `"openai"`   | [`OpenAiEmbedder`] (`POST /v1/embeddings`, needs `OPENAI_API_KEY`) |
//! | `"ollama"`   | [`OllamaEmbedder`] (`POST /api/embed`) |

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::EmbeddingConfig;
use crate::http::{post_json, JsonEndpoint};

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Turns text into vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier stored alongside each vector.
    fn model_name(&self) -> &str;

    /// Embed a batch, returning one vector per input in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query string.
pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    provider
        .embed(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Empty embedding response"))
}

/// Build the configured provider, or `None` when embeddings are disabled.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Option<Box<dyn EmbeddingProvider>>> {
    if !config.is_enabled() {
        return Ok(None);
    }
    match config.provider.as_str() {
        "openai" => Ok(Some(Box::new(OpenAiEmbedder::new(config)?))),
        "ollama" => Ok(Some(Box::new(OllamaEmbedder::new(config)?))),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

/// Reject vectors whose length differs from `[embedding] dims`, so a model
/// swap cannot mix vector sizes in one index.
fn check_dims(vectors: Vec<Vec<f32>>, dims: Option<usize>) -> Result<Vec<Vec<f32>>> {
    if let Some(expected) = dims {
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            bail!(
                "embedding has {} dimensions but embedding.dims = {}",
                bad.len(),
                expected
            );
        }
    }
    Ok(vectors)
}

fn required_model(config: &EmbeddingConfig) -> Result<String> {
    config.model.clone().ok_or_else(|| {
        anyhow!(
            "embedding.model required for {} provider",
            config.provider
        )
    })
}

pub struct OpenAiEmbedder {
    model: String,
    dims: Option<usize>,
    api_key: String,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            model: required_model(config)?,
            dims: config.dims,
            api_key,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_EMBEDDINGS_URL.to_string()),
            max_retries: config.max_retries,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let endpoint = JsonEndpoint {
            service: "OpenAI embeddings",
            url: &self.url,
            bearer: Some(&self.api_key),
        };
        let mut body = json!({ "model": self.model, "input": texts });
        if let Some(dims) = self.dims {
            body["dimensions"] = json!(dims);
        }
        let response = post_json(&self.client, &endpoint, &body, self.max_retries).await?;
        check_dims(parse_openai_response(&response)?, self.dims)
    }
}

pub struct OllamaEmbedder {
    model: String,
    dims: Option<usize>,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let base = config.url.as_deref().unwrap_or(OLLAMA_DEFAULT_URL);
        Ok(Self {
            model: required_model(config)?,
            dims: config.dims,
            url: format!("{}/api/embed", base.trim_end_matches('/')),
            max_retries: config.max_retries,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let endpoint = JsonEndpoint {
            service: "Ollama embeddings",
            url: &self.url,
            bearer: None,
        };
        let body = json!({ "model": self.model, "input": texts });
        let response = post_json(&self.client, &endpoint, &body, self.max_retries).await?;
        check_dims(parse_ollama_response(&response)?, self.dims)
    }
}

/// `data[]` may arrive out of order; each entry carries its input `index`.
fn parse_openai_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        indexed.push((index, to_vector(embedding)?));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn parse_ollama_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?
        .iter()
        .map(to_vector)
        .collect()
}

fn to_vector(value: &Value) -> Result<Vec<f32>> {
    Ok(value
        .as_array()
        .ok_or_else(|| anyhow!("embedding is not an array"))?
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_config_has_no_provider() {
        let provider = create_provider(&EmbeddingConfig::default()).unwrap();
        assert!(provider.is_none());
    }

    #[test]
    fn openai_response_is_reordered_by_index() {
        let json = json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn ollama_response_requires_embeddings_array() {
        assert!(parse_ollama_response(&json!({ "model": "x" })).is_err());
        let vectors = parse_ollama_response(&json!({ "embeddings": [[0.5, 0.25]] })).unwrap();
        assert_eq!(vectors, vec![vec![0.5, 0.25]]);
    }

    #[test]
    fn ollama_url_is_normalised() {
        let config = EmbeddingConfig {
            provider: "ollama".into(),
            model: Some("nomic-embed-text".into()),
            url: Some("http://gpu-box:11434/".into()),
            ..Default::default()
        };
        let embedder = OllamaEmbedder::new(&config).unwrap();
        assert_eq!(embedder.url, "http://gpu-box:11434/api/embed");
        assert_eq!(embedder.model_name(), "nomic-embed-text");
    }

    #[test]
    fn vectors_must_match_configured_dims() {
        let vectors = vec![vec![0.1, 0.2, 0.3], vec![0.4, 0.5, 0.6]];
        assert_eq!(check_dims(vectors.clone(), Some(3)).unwrap(), vectors);
        assert_eq!(check_dims(vectors.clone(), None).unwrap(), vectors);

        let err = check_dims(vec![vec![0.1, 0.2]], Some(3)).unwrap_err();
        assert!(err.to_string().contains("embedding.dims = 3"));
    }

    #[test]
    fn configured_dims_reach_the_provider() {
        let config = EmbeddingConfig {
            provider: "ollama".into(),
            model: Some("nomic-embed-text".into()),
            dims: Some(768),
            ..Default::default()
        };
        let embedder = OllamaEmbedder::new(&config).unwrap();
        assert_eq!(embedder.dims, Some(768));
    }
}
