//! Per-artifact error taxonomy.
//!
//! Each pipeline stage has its own error type. They are wrapped into an
//! [`ArtifactError`] at the task boundary, which knows the [`Stage`] it
//! originated from. None of these ever abort a batch: the orchestrator
//! logs and counts them.
//!
//! Run-level failures (config, prompts, credentials) use `anyhow` instead.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Stage of the per-artifact state machine.
///
/// `Pending → Extracting → Embedding → Assembling → Ingesting → {Committed | Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Pending,
    Extracting,
    Embedding,
    Assembling,
    Ingesting,
    Committed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::Extracting => "extracting",
            Stage::Embedding => "embedding",
            Stage::Assembling => "assembling",
            Stage::Ingesting => "ingesting",
            Stage::Committed => "committed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entity extraction or content description failed.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("failed to read artifact {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("generative model request failed: {0}")]
    Remote(String),

    #[error("generative model returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("generative model returned an unparseable response: {0}")]
    Malformed(String),

    #[error("generative model returned an empty response for the {0} prompt")]
    Empty(&'static str),
}

/// Embedding call failed. Never fails an artifact; the record is
/// degraded to an unavailable vector instead.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Transport(String),

    #[error("embedding endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("embedding response is malformed: {0}")]
    Malformed(String),

    #[error("embedding has {actual} dimensions, index expects {expected}")]
    Dimension { expected: usize, actual: usize },
}

/// The filename carries no `<kind>_<digits>` page marker.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("no page number matching '{kind}_<digits>' in filename '{file_name}'")]
pub struct AssemblyError {
    pub file_name: String,
    pub kind: &'static str,
}

/// Delivery to the index or the local audit copy failed.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("ingest request failed: {0}")]
    Transport(String),

    #[error("index returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to write audit copy {path}: {source}")]
    Audit {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Terminal failure of a single artifact.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("embedding unavailable and policy drops unembedded records")]
    Unembedded,

    #[error("timed out after {0:?} while {1}")]
    Timeout(Duration, Stage),

    #[error("task aborted: {0}")]
    Aborted(String),
}

impl ArtifactError {
    /// Stage the artifact was in when it failed.
    pub fn stage(&self) -> Stage {
        match self {
            ArtifactError::Extraction(_) => Stage::Extracting,
            ArtifactError::Unembedded => Stage::Embedding,
            ArtifactError::Assembly(_) => Stage::Assembling,
            ArtifactError::Ingest(_) => Stage::Ingesting,
            ArtifactError::Timeout(_, stage) => *stage,
            ArtifactError::Aborted(_) => Stage::Pending,
        }
    }

    /// Short error kind label for logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ArtifactError::Extraction(_) => "extraction_error",
            ArtifactError::Unembedded => "embedding_unavailable",
            ArtifactError::Assembly(_) => "assembly_error",
            ArtifactError::Ingest(_) => "ingest_error",
            ArtifactError::Timeout(..) => "timeout",
            ArtifactError::Aborted(_) => "aborted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_follows_error_variant() {
        let err: ArtifactError = AssemblyError {
            file_name: "cover.png".into(),
            kind: "image",
        }
        .into();
        assert_eq!(err.stage(), Stage::Assembling);
        assert_eq!(err.kind(), "assembly_error");

        let err: ArtifactError = ExtractionError::Empty("entity").into();
        assert_eq!(err.stage(), Stage::Extracting);

        let err = ArtifactError::Timeout(Duration::from_secs(5), Stage::Embedding);
        assert_eq!(err.stage(), Stage::Embedding);
        assert!(err.to_string().contains("embedding"));
    }

    #[test]
    fn assembly_error_names_the_file() {
        let err = AssemblyError {
            file_name: "page.txt".into(),
            kind: "text",
        };
        assert_eq!(
            err.to_string(),
            "no page number matching 'text_<digits>' in filename 'page.txt'"
        );
    }
}
