use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::config::Config;
use crate::error::{PipelineError, PipelineResult};

/// Turns text into fixed-length vectors. One vector per input, same order.
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> PipelineResult<Vec<Vec<f32>>>;
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Client for the local ML service's `/embeddings/text` endpoint.
pub struct HttpEmbedder {
    client: Client,
    url: String,
    model: String,
}

impl HttpEmbedder {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            url: config.embedding_url.trim_end_matches('/').to_string(),
            model: config.embedding_model.clone(),
        })
    }
}

/// Checks that the service answered with one non-empty vector per text, all
/// of the same dimension.
pub fn check_embeddings(expected: usize, embeddings: Vec<Vec<f32>>) -> PipelineResult<Vec<Vec<f32>>> {
    if embeddings.len() != expected {
        return Err(PipelineError::Embedding(format!(
            "expected {} embeddings, got {}",
            expected,
            embeddings.len()
        )));
    }
    let dimension = embeddings.first().map(Vec::len).unwrap_or(0);
    if expected > 0 && dimension == 0 {
        return Err(PipelineError::Embedding("empty embedding vector".to_string()));
    }
    if let Some(bad) = embeddings.iter().position(|e| e.len() != dimension) {
        return Err(PipelineError::Embedding(format!(
            "embedding {} has dimension {}, expected {}",
            bad,
            embeddings[bad].len(),
            dimension
        )));
    }
    Ok(embeddings)
}

#[async_trait]
impl TextEmbedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> PipelineResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/embeddings/text", self.url))
            .json(&json!({ "texts": texts, "model": self.model }))
            .send()
            .await
            .map_err(|e| PipelineError::Embedding(format!("embedding service unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Embedding(format!(
                "embedding service returned {}: {}",
                status, body
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Embedding(format!("bad embedding response: {}", e)))?;
        tracing::debug!(count = parsed.embeddings.len(), "embedded texts");
        check_embeddings(texts.len(), parsed.embeddings)
    }
}
