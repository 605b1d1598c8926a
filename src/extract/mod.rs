//! Entity extraction, the first enrichment stage.
//!
//! Two implementations of [`EntityExtractor`]:
//! - [`ImageEntityExtractor`] asks a vision-capable generative model for the
//!   entities on a page image and for a description of its content.
//! - [`TextEntityExtractor`] runs a local, deterministic named-entity
//!   chunker over page text.

use async_trait::async_trait;

use crate::error::ExtractionError;
use crate::models::{Artifact, EntitySet};

pub mod image;
pub mod text;

pub use image::{BedrockGenerativeModel, GenerativeModel, ImageEntityExtractor, ImagePayload};
pub use text::{extract_entities, TextEntityExtractor};

/// Derives an [`EntitySet`] from one artifact.
#[async_trait]
pub trait EntityExtractor: Send + Sync {
    async fn extract(&self, artifact: &Artifact) -> Result<EntitySet, ExtractionError>;
}
