//! Core data models used throughout the pipeline.
//!
//! These types represent the artifacts, enrichment results, and index
//! records that flow from acquisition through ingestion.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};

/// Type of page-level input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Image,
    Text,
}

impl ArtifactKind {
    /// Classify a file by extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" | "jpg" | "jpeg" | "gif" | "webp" => Some(ArtifactKind::Image),
            "txt" => Some(ArtifactKind::Text),
            _ => None,
        }
    }

    /// Prefix used in the `<kind>_<digits>` filename convention.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Image => "image",
            ArtifactKind::Text => "text",
        }
    }
}

/// Where an artifact's content lives.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentHandle {
    /// Path to the staged image bytes.
    ImagePath(PathBuf),
    /// Raw page text.
    Text(String),
}

/// One page-level unit of input. Immutable once acquired.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    /// File name without extension (e.g. `image_12`).
    pub stem: String,
    /// Full file name (e.g. `image_12.png`).
    pub file_name: String,
    /// Extension without the dot, as found on disk.
    pub extension: String,
    pub kind: ArtifactKind,
    pub content: ContentHandle,
}

impl Artifact {
    /// Build an image artifact referencing the staged file at `path`.
    pub fn image(path: &Path) -> Self {
        let (stem, file_name, extension) = name_parts(path);
        Self {
            stem,
            file_name,
            extension,
            kind: ArtifactKind::Image,
            content: ContentHandle::ImagePath(path.to_path_buf()),
        }
    }

    /// Build a text artifact from the page text read from `path`.
    pub fn text(path: &Path, text: String) -> Self {
        let (stem, file_name, extension) = name_parts(path);
        Self {
            stem,
            file_name,
            extension,
            kind: ArtifactKind::Text,
            content: ContentHandle::Text(text),
        }
    }

    /// Page number digit group, if the filename follows `<kind>_<digits>`.
    pub fn page_number(&self) -> Option<&str> {
        crate::assemble::parse_page_number(&self.file_name, self.kind)
    }
}

fn name_parts(path: &Path) -> (String, String, String) {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    (stem, file_name, extension)
}

/// Entities and description derived from one artifact.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntitySet {
    /// Ordered, deduplicated entity strings.
    pub entities: Vec<String>,
    /// Raw extractor output (image artifacts only).
    pub raw: Option<String>,
    /// Free-text content description (image artifacts only).
    pub description: Option<String>,
}

impl EntitySet {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.raw.is_none() && self.description.is_none()
    }
}

/// Embedding of a record's text, or the sentinel for a failed call.
///
/// Serializes as a JSON array, or `null` when unavailable.
#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddingVector {
    Available(Vec<f32>),
    Unavailable,
}

impl EmbeddingVector {
    pub fn is_available(&self) -> bool {
        matches!(self, EmbeddingVector::Available(_))
    }

    pub fn as_slice(&self) -> Option<&[f32]> {
        match self {
            EmbeddingVector::Available(v) => Some(v),
            EmbeddingVector::Unavailable => None,
        }
    }
}

impl Serialize for EmbeddingVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_slice().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EmbeddingVector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<Vec<f32>>::deserialize(deserializer)? {
            Some(v) => EmbeddingVector::Available(v),
            None => EmbeddingVector::Unavailable,
        })
    }
}

/// `metadata` object of an [`IngestRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub filename: String,
    pub entities: String,
}

/// The canonical unit delivered to the search index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRecord {
    pub file_path: String,
    pub file_text: String,
    pub page_number: String,
    pub metadata: RecordMetadata,
    pub vector_embedding: EmbeddingVector,
}

/// Local JSON copy of an assembled record, one file per artifact stem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub file_type: String,
    pub file_name: String,
    pub text: String,
    pub entities: String,
    pub page_number: String,
}

impl AuditRecord {
    pub fn new(artifact: &Artifact, record: &IngestRecord) -> Self {
        Self {
            file_type: artifact.kind.as_str().to_string(),
            file_name: artifact.file_name.clone(),
            text: record.file_text.clone(),
            entities: record.metadata.entities.clone(),
            page_number: record.page_number.clone(),
        }
    }
}

/// Opaque acknowledgment returned by the index: the raw response body.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestAck(pub String);
