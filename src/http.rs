//! JSON-over-HTTP with retry, shared by the embedding and chat clients.
//!
//! Retry strategy:
//! - HTTP 429 and 5xx: retry
//! - other 4xx: fail immediately
//! - network errors: retry
//! - backoff 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("{service} returned {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} request failed: {message}")]
    Transport {
        service: &'static str,
        message: String,
    },

    #[error("{service} response was not JSON: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },
}

/// Delay before retry `attempt` (1-based).
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt.saturating_sub(1)).min(5))
}

/// One JSON endpoint: where to POST and how to authenticate.
pub struct JsonEndpoint<'a> {
    pub service: &'static str,
    pub url: &'a str,
    pub bearer: Option<&'a str>,
}

/// POST `body` to `endpoint`, retrying transient failures up to `max_retries` times.
pub async fn post_json(
    client: &reqwest::Client,
    endpoint: &JsonEndpoint<'_>,
    body: &Value,
    max_retries: u32,
) -> Result<Value, HttpError> {
    let service = endpoint.service;
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = backoff_delay(attempt);
            debug!(service, attempt, delay_secs = delay.as_secs(), "retrying");
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(endpoint.url).json(body);
        if let Some(token) = endpoint.bearer {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return response.json().await.map_err(|e| HttpError::Decode {
                        service,
                        message: e.to_string(),
                    });
                }

                let body_text = response.text().await.unwrap_or_default();
                let err = HttpError::Status {
                    service,
                    status: status.as_u16(),
                    body: body_text,
                };
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(err);
                    continue;
                }
                return Err(err);
            }
            Err(e) => {
                last_err = Some(HttpError::Transport {
                    service,
                    message: format!("{} ({})", e, endpoint.url),
                });
            }
        }
    }

    Err(last_err.unwrap_or(HttpError::Transport {
        service,
        message: "no attempts were made".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(4), Duration::from_secs(8));
        assert_eq!(backoff_delay(6), Duration::from_secs(32));
        assert_eq!(backoff_delay(12), Duration::from_secs(32));
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_error() {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        let endpoint = JsonEndpoint {
            service: "test",
            url: "http://127.0.0.1:9/unreachable",
            bearer: None,
        };
        let err = post_json(&client, &endpoint, &serde_json::json!({}), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Transport { .. }));
    }
}
