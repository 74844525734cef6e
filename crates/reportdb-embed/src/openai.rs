//! Client for an OpenAI-compatible `/v1/embeddings` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use reportdb_core::error::{Error, Result};
use reportdb_core::traits::EmbedProvider;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    dim: usize,
    id: String,
}

impl OpenAiEmbedder {
    pub fn new(base_url: &str, model: &str, api_key: impl Into<String>, dim: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/v1/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key: api_key.into(),
            dim,
            id: format!("openai:{model}:d{dim}"),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// `Retry-After` in delta-seconds form; HTTP dates are ignored.
fn parse_retry_after(value: Option<&reqwest::header::HeaderValue>) -> Option<Duration> {
    let secs: f64 = value?.to_str().ok()?.trim().parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}

#[async_trait]
impl EmbedProvider for OpenAiEmbedder {
    fn embedder_id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest { model: &self.model, input: texts })
            .send()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("request to {} failed: {e}", self.endpoint)))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited { retry_after: parse_retry_after(resp.headers().get(RETRY_AFTER)) });
        }
        if status.is_server_error() {
            return Err(Error::ProviderUnavailable(format!("embedding endpoint returned {status}")));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Operation(format!("embedding request rejected ({status}): {body}")));
        }

        let mut parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| Error::ProviderUnavailable(format!("malformed embedding response: {e}")))?;
        parsed.data.sort_by_key(|d| d.index);
        debug!(inputs = texts.len(), outputs = parsed.data.len(), model = %self.model, "embedded batch");
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}
