//! Embedding generation.
//!
//! [`Embedder`] is the stage contract: it always returns an
//! [`EmbeddingVector`], degrading to [`EmbeddingVector::Unavailable`] when
//! the remote call fails. [`EmbeddingGenerator`] implements it against the
//! Bedrock runtime (`{"inputText": ...}` in, `{"embedding": [...]}` out).
//!
//! # Retry Strategy
//!
//! Inherited from the injected [`RetryPolicy`](crate::retry::RetryPolicy):
//! - HTTP 429 and 5xx → retry with exponential backoff
//! - other HTTP 4xx → fail immediately
//! - network errors → retry
//!
//! A response whose vector length differs from the configured dimension is
//! treated as malformed.

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::EmbeddingError;
use crate::models::EmbeddingVector;
use crate::remote::{RemoteClient, RemoteFailure};
use crate::sigv4::uri_encode;

/// Stage contract for embedding a record's text.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    async fn embed(&self, text: &str) -> EmbeddingVector;
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    #[serde(rename = "inputText")]
    input_text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Option<Vec<f32>>,
}

/// Remote embedding client for Bedrock embedding models.
pub struct EmbeddingGenerator {
    remote: RemoteClient,
    url: Url,
    model: String,
    dims: usize,
}

impl EmbeddingGenerator {
    pub fn new(remote: RemoteClient, base_url: &str, model: &str, dims: usize) -> anyhow::Result<Self> {
        let url = Url::parse(&format!(
            "{}/model/{}/invoke",
            base_url.trim_end_matches('/'),
            uri_encode(model)
        ))?;
        Ok(Self {
            remote,
            url,
            model: model.to_string(),
            dims,
        })
    }

    /// Call the endpoint and validate the response.
    pub async fn try_embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let body = serde_json::to_vec(&EmbedRequest { input_text: text })
            .map_err(|e| EmbeddingError::Malformed(e.to_string()))?;

        let response = self
            .remote
            .post_json(&self.url, &body)
            .await
            .map_err(|failure| match failure {
                RemoteFailure::Transport(msg) => EmbeddingError::Transport(msg),
                RemoteFailure::Status { status, body } => EmbeddingError::Status { status, body },
            })?;

        parse_embedding(&response, self.dims)
    }
}

/// Parse `{"embedding": [...]}` and check the dimension.
pub fn parse_embedding(body: &str, dims: usize) -> Result<Vec<f32>, EmbeddingError> {
    let parsed: EmbedResponse =
        serde_json::from_str(body).map_err(|e| EmbeddingError::Malformed(e.to_string()))?;
    let vector = parsed
        .embedding
        .ok_or_else(|| EmbeddingError::Malformed("missing embedding field".to_string()))?;
    if vector.len() != dims {
        return Err(EmbeddingError::Dimension {
            expected: dims,
            actual: vector.len(),
        });
    }
    Ok(vector)
}

#[async_trait]
impl Embedder for EmbeddingGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> EmbeddingVector {
        match self.try_embed(text).await {
            Ok(vector) => EmbeddingVector::Available(vector),
            Err(e) => {
                warn!(model = %self.model, error = %e, "embedding unavailable");
                EmbeddingVector::Unavailable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_response() {
        let v = parse_embedding(r#"{"embedding":[0.5,-0.25,1.0],"inputTextTokenCount":3}"#, 3)
            .unwrap();
        assert_eq!(v, vec![0.5, -0.25, 1.0]);
    }

    #[test]
    fn missing_field_is_malformed() {
        let err = parse_embedding(r#"{"vectors":[]}"#, 3).unwrap_err();
        assert!(matches!(err, EmbeddingError::Malformed(_)));
    }

    #[test]
    fn garbage_is_malformed() {
        let err = parse_embedding("<html>busy</html>", 3).unwrap_err();
        assert!(matches!(err, EmbeddingError::Malformed(_)));
    }

    #[test]
    fn wrong_dimension_rejected() {
        let err = parse_embedding(r#"{"embedding":[1.0,2.0]}"#, 1536).unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::Dimension {
                expected: 1536,
                actual: 2
            }
        ));
    }

    #[test]
    fn request_uses_input_text_key() {
        let body = serde_json::to_value(EmbedRequest { input_text: "hello" }).unwrap();
        assert_eq!(body, serde_json::json!({"inputText": "hello"}));
    }
}
