use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{EmbeddingConfig, EmbeddingProvider, ProviderError};
use crate::skill_normalizer::SkillSet;

/// Embedding client for OpenAI-compatible `/embeddings` endpoints.
pub struct HttpEmbeddingProvider {
    client: Client,
    endpoint: String,
    model: String,
    dimension: usize,
    max_retries: u32,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl HttpEmbeddingProvider {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, ProviderError> {
        if config.endpoint.trim().is_empty() {
            return Err(ProviderError::Permanent(
                "TM_EMBEDDING_ENDPOINT is required for the http provider".into(),
            ));
        }
        if config.model.trim().is_empty() {
            return Err(ProviderError::Permanent(
                "TM_EMBEDDING_MODEL is required for the http provider".into(),
            ));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if !config.api_key.trim().is_empty() {
            let auth = format!("Bearer {}", config.api_key.trim());
            let value = HeaderValue::from_str(&auth)
                .map_err(|_| ProviderError::Permanent("invalid embedding api key".into()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .default_headers(headers)
            .build()
            .map_err(|err| ProviderError::Permanent(format!("failed to build http client: {err}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.endpoint.trim_end_matches('/')),
            model: config.model.clone(),
            dimension: config.dimension.max(1),
            max_retries: config.max_retries,
        })
    }

    async fn request_once(&self, input: &str) -> Result<Vec<f32>, ProviderError> {
        let request = EmbeddingRequest {
            model: &self.model,
            input,
            dimensions: self.dimension,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(classify_status(status, retry_after, &body));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::Permanent(format!("invalid embedding response: {err}")))?;

        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|entry| entry.embedding)
            .ok_or_else(|| ProviderError::Permanent("embedding response had no data".into()))?;

        if vector.len() != self.dimension {
            return Err(ProviderError::Permanent(format!(
                "provider returned {} dimensions, expected {}",
                vector.len(),
                self.dimension
            )));
        }

        Ok(vector)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    fn version(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, skills: &SkillSet) -> Result<Vec<f32>, ProviderError> {
        let input = skills.to_embedding_text();
        let mut attempt = 0u32;

        loop {
            match self.request_once(&input).await {
                Ok(vector) => return Ok(vector),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = retry_backoff(attempt);
                    warn!(attempt, backoff_ms = backoff.as_millis() as u64, error = %err, "embedding request failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => {
                    debug!(attempt, error = %err, "embedding request gave up");
                    return Err(err);
                }
            }
        }
    }
}

fn classify_transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        ProviderError::retryable(format!("embedding transport error: {err}"))
    } else {
        ProviderError::Permanent(format!("embedding request error: {err}"))
    }
}

fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> ProviderError {
    let mut snippet: String = body.chars().take(200).collect();
    if snippet.is_empty() {
        snippet.push_str("<empty body>");
    }
    let message = format!("embedding endpoint returned {status}: {snippet}");

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ProviderError::Retryable {
            message,
            retry_after,
        }
    } else {
        ProviderError::Permanent(message)
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn retry_backoff(attempt: u32) -> Duration {
    let capped = attempt.min(5);
    Duration::from_millis(250 * (1u64 << capped))
}
