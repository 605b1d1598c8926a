//! Image entity extraction through a vision-capable generative model.
//!
//! Each page image is sent twice: once with the entity prompt and once
//! with the description prompt. Both calls run concurrently; either one
//! failing or coming back empty fails the artifact.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use super::EntityExtractor;
use crate::error::ExtractionError;
use crate::models::{Artifact, ContentHandle, EntitySet};
use crate::remote::{RemoteClient, RemoteFailure};
use crate::sigv4::uri_encode;

/// Base64-encoded image ready to embed in a model request.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePayload {
    pub media_type: &'static str,
    pub data: String,
}

impl ImagePayload {
    pub fn from_bytes(bytes: &[u8], extension: &str) -> Self {
        Self {
            media_type: media_type_for(extension),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }
}

fn media_type_for(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "image/png",
    }
}

/// A generative model that answers a text prompt about one image.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, prompt: &str, image: &ImagePayload) -> Result<String, ExtractionError>;
}

// ============ Bedrock (Anthropic messages) ============

#[derive(Serialize)]
struct InvokeRequest<'a> {
    anthropic_version: &'static str,
    max_tokens: u32,
    messages: [Message<'a>; 1],
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: [ContentBlock<'a>; 2],
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ContentBlock<'a> {
    Image { source: ImageSource<'a> },
    Text { text: &'a str },
}

#[derive(Serialize)]
struct ImageSource<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: &'a str,
    data: &'a str,
}

#[derive(Deserialize)]
struct InvokeResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
}

#[derive(Deserialize)]
struct ResponseBlock {
    #[serde(default)]
    text: Option<String>,
}

/// Calls `POST {endpoint}/model/{model_id}/invoke` on the Bedrock runtime.
pub struct BedrockGenerativeModel {
    remote: RemoteClient,
    url: Url,
    model_id: String,
    max_tokens: u32,
}

impl BedrockGenerativeModel {
    pub fn new(
        remote: RemoteClient,
        base_url: &str,
        model_id: &str,
        max_tokens: u32,
    ) -> anyhow::Result<Self> {
        let url = Url::parse(&format!(
            "{}/model/{}/invoke",
            base_url.trim_end_matches('/'),
            uri_encode(model_id)
        ))?;
        Ok(Self {
            remote,
            url,
            model_id: model_id.to_string(),
            max_tokens,
        })
    }
}

#[async_trait]
impl GenerativeModel for BedrockGenerativeModel {
    fn model_name(&self) -> &str {
        &self.model_id
    }

    async fn complete(&self, prompt: &str, image: &ImagePayload) -> Result<String, ExtractionError> {
        let request = InvokeRequest {
            anthropic_version: "bedrock-2023-05-31",
            max_tokens: self.max_tokens,
            messages: [Message {
                role: "user",
                content: [
                    ContentBlock::Image {
                        source: ImageSource {
                            kind: "base64",
                            media_type: image.media_type,
                            data: &image.data,
                        },
                    },
                    ContentBlock::Text { text: prompt },
                ],
            }],
        };
        let body =
            serde_json::to_vec(&request).map_err(|e| ExtractionError::Malformed(e.to_string()))?;

        let text = self
            .remote
            .post_json(&self.url, &body)
            .await
            .map_err(|failure| match failure {
                RemoteFailure::Transport(msg) => ExtractionError::Remote(msg),
                RemoteFailure::Status { status, body } => ExtractionError::Status { status, body },
            })?;

        let parsed: InvokeResponse =
            serde_json::from_str(&text).map_err(|e| ExtractionError::Malformed(e.to_string()))?;

        Ok(parsed
            .content
            .into_iter()
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join(""))
    }
}

// ============ Extractor ============

/// Entity + description extraction for image artifacts.
pub struct ImageEntityExtractor {
    model: Arc<dyn GenerativeModel>,
    entity_prompt: String,
    describe_prompt: String,
}

impl ImageEntityExtractor {
    pub fn new(model: Arc<dyn GenerativeModel>, entity_prompt: String, describe_prompt: String) -> Self {
        Self {
            model,
            entity_prompt,
            describe_prompt,
        }
    }
}

#[async_trait]
impl EntityExtractor for ImageEntityExtractor {
    async fn extract(&self, artifact: &Artifact) -> Result<EntitySet, ExtractionError> {
        let path = match &artifact.content {
            ContentHandle::ImagePath(p) => p,
            ContentHandle::Text(_) => {
                return Err(ExtractionError::Malformed(format!(
                    "{} is not an image artifact",
                    artifact.file_name
                )))
            }
        };

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ExtractionError::Read {
                path: path.display().to_string(),
                source,
            })?;
        let payload = ImagePayload::from_bytes(&bytes, &artifact.extension);

        debug!(artifact = %artifact.stem, model = self.model.model_name(), "invoking generative model");
        let (raw, description) = tokio::try_join!(
            self.model.complete(&self.entity_prompt, &payload),
            self.model.complete(&self.describe_prompt, &payload),
        )?;

        let raw = raw.trim().to_string();
        if raw.is_empty() {
            return Err(ExtractionError::Empty("entity"));
        }
        let description = description.trim().to_string();
        if description.is_empty() {
            return Err(ExtractionError::Empty("describe"));
        }

        Ok(EntitySet {
            entities: split_entity_list(&raw),
            raw: Some(raw),
            description: Some(description),
        })
    }
}

/// Turn a model's free-form entity answer into a deduplicated list.
///
/// Accepts comma- or line-separated answers, with optional bullets or
/// numbering.
pub fn split_entity_list(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.split(|c: char| c == ',' || c == '\n' || c == ';')
        .map(|item| strip_list_marker(item).to_string())
        .filter(|item| !item.is_empty())
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Drop a leading bullet (`-`, `*`, `•`) or ordinal (`1.`, `2)`).
fn strip_list_marker(item: &str) -> &str {
    let item = item.trim().trim_start_matches(['-', '*', '•']).trim_start();
    let digits = item.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        if let Some(rest) = item[digits..].strip_prefix(['.', ')']) {
            return rest.trim();
        }
    }
    item.trim_end()
}
