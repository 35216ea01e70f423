//! OpenAI-compatible HTTP embedding backend.
//!
//! Requires the `embeddings-openai` feature. Any endpoint that speaks the
//! `/embeddings` request and response shape works, including self-hosted
//! sentence-transformer servers.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::embedding::{EmbeddingStrategy, TextEmbedder};
use crate::error::{RagError, Result};
use crate::vector::Vector;

/// Request structure for the embeddings endpoint.
#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

/// Response structure from the embeddings endpoint.
#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// HTTP embedder for one strategy.
///
/// Transport and server failures surface as `ModelUnavailable` for the
/// embedder's strategy, so a build or query never continues in another
/// vector space.
pub struct OpenAiEmbedder {
    client: Client,
    strategy: EmbeddingStrategy,
    endpoint: String,
    api_key: String,
    model: String,
    dimension: usize,
}

impl OpenAiEmbedder {
    /// Create a new embedder against `base_url` (for example
    /// `https://api.openai.com/v1`).
    pub fn new(
        strategy: EmbeddingStrategy,
        base_url: String,
        api_key: String,
        model: String,
        dimension: usize,
    ) -> Result<Self> {
        if model.is_empty() {
            return Err(RagError::model_unavailable(strategy, "empty model name"));
        }
        Ok(Self {
            client: Client::new(),
            strategy,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            api_key,
            model,
            dimension,
        })
    }

    fn unavailable(&self, reason: String) -> RagError {
        RagError::model_unavailable(self.strategy, format!("{}: {reason}", self.model))
    }

    fn requested_dimensions(&self) -> Option<usize> {
        // Only the text-embedding-3 family accepts a dimensions override.
        self.model
            .starts_with("text-embedding-3")
            .then_some(self.dimension)
    }
}

#[async_trait]
impl TextEmbedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vector> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| self.unavailable("no embedding in response".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vector>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts.to_vec(),
            dimensions: self.requested_dimensions(),
        };

        let http_response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.unavailable(format!("request failed: {e}")))?;

        let status = http_response.status();
        let response_text = http_response
            .text()
            .await
            .map_err(|e| self.unavailable(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(self.unavailable(format!("status {status}: {response_text}")));
        }

        let response: EmbeddingResponse = serde_json::from_str(&response_text)
            .map_err(|e| RagError::embedding(format!("failed to parse response: {e}")))?;
        if response.data.len() != texts.len() {
            return Err(RagError::embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                response.data.len()
            )));
        }

        let mut data = response.data;
        if data.iter().all(|d| d.index.is_some()) {
            data.sort_by_key(|d| d.index);
        }
        data.into_iter()
            .map(|d| {
                let vector = Vector::new(d.embedding);
                vector.validate_dimension(self.dimension)?;
                Ok(vector)
            })
            .collect()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_and_dimension_override() {
        let embedder = OpenAiEmbedder::new(
            EmbeddingStrategy::General,
            "http://localhost:8080/v1/".to_string(),
            "key".to_string(),
            "BAAI/bge-small-en-v1.5".to_string(),
            384,
        )
        .unwrap();
        assert_eq!(embedder.endpoint, "http://localhost:8080/v1/embeddings");
        assert_eq!(embedder.requested_dimensions(), None);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_model_unavailable() {
        let embedder = OpenAiEmbedder::new(
            EmbeddingStrategy::Biomedical,
            "http://127.0.0.1:9".to_string(),
            "key".to_string(),
            "pritamdeka/S-PubMedBert-MS-MARCO".to_string(),
            768,
        )
        .unwrap();
        let err = embedder.embed("dose").await.unwrap_err();
        assert!(matches!(
            err,
            RagError::ModelUnavailable {
                strategy: EmbeddingStrategy::Biomedical,
                ..
            }
        ));
    }
}
